//! Validation for the non-path inputs that reach rclone
//!
//! Task identifiers, connection names and exclude patterns all end up in
//! argument vectors or on-disk records, so they are checked here before use.

use anyhow::{bail, Result};

/// Validate and sanitize exclude patterns
///
/// Ensures patterns are safe, properly formatted, and within reasonable limits.
pub fn validate_exclude_patterns(patterns: &[String]) -> Result<()> {
    const MAX_PATTERNS: usize = 100;
    const MAX_PATTERN_LENGTH: usize = 255;

    if patterns.len() > MAX_PATTERNS {
        bail!(
            "Too many exclusion patterns: {} (max: {})",
            patterns.len(),
            MAX_PATTERNS
        );
    }

    for pattern in patterns {
        let trimmed = pattern.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > MAX_PATTERN_LENGTH {
            bail!(
                "Pattern too long: '{}' ({} chars, max: {})",
                &trimmed[..trimmed.char_indices().nth(20).map_or(trimmed.len(), |(i, _)| i)],
                trimmed.len(),
                MAX_PATTERN_LENGTH
            );
        }

        if trimmed.contains("..") {
            bail!("Pattern contains path traversal: '{}'", trimmed);
        }

        if trimmed.contains('\0') || trimmed.contains('\n') || trimmed.contains('\r') {
            bail!("Pattern contains control characters");
        }

        if trimmed.contains(['`', '$', ';', '&', '|', '>', '<']) {
            bail!("Pattern contains shell metacharacters: '{}'", trimmed);
        }

        globset::Glob::new(trimmed)
            .map_err(|e| anyhow::anyhow!("Invalid glob pattern '{}': {}", trimmed, e))?;
    }

    Ok(())
}

/// Validate and sanitize task ID
///
/// Ensures task IDs are safe and well-formed.
pub fn validate_task_id(task_id: &str) -> Result<()> {
    const MAX_TASK_ID_LENGTH: usize = 100;

    if task_id.is_empty() {
        bail!("Task ID cannot be empty");
    }

    if task_id.len() > MAX_TASK_ID_LENGTH {
        bail!(
            "Task ID too long: {} chars (max: {})",
            task_id.len(),
            MAX_TASK_ID_LENGTH
        );
    }

    // Only allow alphanumeric, hyphen, underscore
    if !task_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("Task ID contains invalid characters: '{}'", task_id);
    }

    Ok(())
}

/// Validate an rclone connection name (the part before `:`).
///
/// An empty name is valid and means "local filesystem".
pub fn validate_connection_name(name: &str) -> Result<()> {
    const MAX_NAME_LENGTH: usize = 64;

    if name.len() > MAX_NAME_LENGTH {
        bail!(
            "Connection name too long: {} chars (max: {})",
            name.len(),
            MAX_NAME_LENGTH
        );
    }

    if name.starts_with('-') {
        bail!("Connection name cannot start with '-': '{}'", name);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        bail!("Connection name contains invalid characters: '{}'", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_exclude_patterns_valid() {
        let patterns = vec![
            "*.log".to_string(),
            "node_modules/**".to_string(),
            ".git".to_string(),
        ];
        assert!(validate_exclude_patterns(&patterns).is_ok());
    }

    #[test]
    fn test_validate_exclude_patterns_too_many() {
        let patterns: Vec<String> = (0..101).map(|i| format!("pattern_{}", i)).collect();
        assert!(validate_exclude_patterns(&patterns).is_err());
    }

    #[test]
    fn test_validate_exclude_patterns_traversal() {
        let patterns = vec!["../../etc/passwd".to_string()];
        let result = validate_exclude_patterns(&patterns);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("path traversal"));
    }

    #[test]
    fn test_validate_exclude_patterns_null_byte() {
        let patterns = vec!["test\0file".to_string()];
        assert!(validate_exclude_patterns(&patterns).is_err());
    }

    #[test]
    fn test_validate_exclude_patterns_shell_metacharacters() {
        let patterns = vec!["*.tmp; rm -rf /".to_string()];
        assert!(validate_exclude_patterns(&patterns).is_err());
    }

    #[test]
    fn test_validate_exclude_patterns_empty() {
        let patterns = vec!["".to_string(), "  ".to_string()];
        assert!(validate_exclude_patterns(&patterns).is_ok()); // Empty patterns are skipped
    }

    #[test]
    fn test_validate_task_id_valid() {
        assert!(validate_task_id("task-123").is_ok());
        assert!(validate_task_id("my_task").is_ok());
        assert!(validate_task_id("6f1c2a0e-3b7d-4c55-9a8e-2d1f0b9c7e41").is_ok());
    }

    #[test]
    fn test_validate_task_id_invalid() {
        assert!(validate_task_id("task with spaces").is_err());
        assert!(validate_task_id("task/123").is_err());
        assert!(validate_task_id("task;rm -rf /").is_err());
        assert!(validate_task_id("").is_err());
    }

    #[test]
    fn test_validate_task_id_too_long() {
        let long_id = "a".repeat(101);
        assert!(validate_task_id(&long_id).is_err());
    }

    #[test]
    fn test_validate_connection_name() {
        assert!(validate_connection_name("google").is_ok());
        assert!(validate_connection_name("onedrive-business").is_ok());
        assert!(validate_connection_name("").is_ok());
        assert!(validate_connection_name("my:remote").is_err());
        assert!(validate_connection_name("--config").is_err());
        assert!(validate_connection_name("a b").is_err());
    }
}
