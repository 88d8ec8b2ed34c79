//! Decoding of rclone's `--stats` / `-v` output into progress deltas.
//!
//! The parser is stateless: each output line is decoded on its own and the
//! orchestrator folds the resulting deltas into a [`SyncProgress`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One incremental update decoded from a single output line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDelta {
    pub files_transferred: Option<u64>,
    pub total_files: Option<u64>,
    pub bytes_transferred: Option<u64>,
    pub total_bytes: Option<u64>,
    /// Bytes per second as reported by rclone.
    pub speed: Option<f64>,
    /// A file rclone gave up on.
    pub failed_file: Option<String>,
    /// The text of an ERROR line, kept for classification at exit.
    pub error_line: Option<String>,
}

impl ProgressDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Turns one unit of subprocess output into a delta, or `None` for output
/// that carries nothing the run cares about.
pub trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<ProgressDelta>;
}

/// Live counters for one subprocess run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total_files: u64,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub speed: Option<f64>,
    pub failed_files: Vec<String>,
    pub error_message: Option<String>,
}

impl SyncProgress {
    /// Fold a delta in. Counters only move forward; failed files are
    /// appended once each.
    pub fn apply(&mut self, delta: &ProgressDelta) {
        if let Some(n) = delta.files_transferred {
            self.files_transferred = self.files_transferred.max(n);
        }
        if let Some(n) = delta.total_files {
            self.total_files = self.total_files.max(n);
        }
        if let Some(n) = delta.bytes_transferred {
            self.bytes_transferred = self.bytes_transferred.max(n);
        }
        if let Some(n) = delta.total_bytes {
            self.total_bytes = self.total_bytes.max(n);
        }
        if delta.speed.is_some() {
            self.speed = delta.speed;
        }
        if let Some(file) = &delta.failed_file {
            if !self.failed_files.iter().any(|f| f == file) {
                self.failed_files.push(file.clone());
            }
        }
        if let Some(line) = &delta.error_line {
            self.error_message = Some(line.clone());
        }
    }

    /// Some, but not all, files made it.
    pub fn partial_success(&self) -> bool {
        self.files_transferred > 0 && self.files_transferred < self.total_files
    }

    /// Totals as reported can lag behind failures; every failed file is a
    /// file that was meant to transfer.
    pub fn reconcile_totals(&mut self) {
        let floor = self.files_transferred + self.failed_files.len() as u64;
        self.total_files = self.total_files.max(floor);
    }

    pub fn fraction(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.bytes_transferred as f64 / self.total_bytes as f64).min(1.0)
        } else if self.total_files > 0 {
            (self.files_transferred as f64 / self.total_files as f64).min(1.0)
        } else {
            0.0
        }
    }
}

static LOG_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\s+(?P<level>[A-Z]+)\s*:\s*")
        .expect("log prefix pattern compiles")
});

static BYTES_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:Transferred:\s*)?(?P<done>[\d.]+\s*[KMGTP]?i?B)\s*/\s*(?P<total>[\d.]+\s*[KMGTP]?i?B),\s*(?:\d+%|-)(?:,\s*(?P<speed>[\d.]+\s*[KMGTP]?i?B)/s)?",
    )
    .expect("bytes pattern compiles")
});

static FILES_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Transferred:\s*(?P<done>\d+)\s*/\s*(?P<total>\d+),\s*(?:\d+%|-)")
        .expect("files pattern compiles")
});

/// rclone's end-of-attempt summary repeats the last file error.
static ATTEMPT_SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Attempt \d+/\d+ failed with \d+ errors?").expect("attempt summary pattern compiles")
});

static FILE_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<file>.+?):\s+(?:Failed to (?:copy|move|delete|update|upload|download|set modification time)|corrupted on transfer)",
    )
    .expect("file failure pattern compiles")
});

/// Parser for rclone `-v --stats` output.
#[derive(Debug, Default, Clone, Copy)]
pub struct RcloneProgressParser;

impl RcloneProgressParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_error(body: &str) -> ProgressDelta {
        let failed_file = Some(body)
            .filter(|b| !ATTEMPT_SUMMARY.is_match(b))
            .and_then(|b| FILE_FAILURE.captures(b))
            .map(|caps| caps["file"].trim().to_string())
            .filter(|f| !f.is_empty());

        ProgressDelta {
            failed_file,
            error_line: Some(body.to_string()),
            ..ProgressDelta::default()
        }
    }
}

impl ProgressParser for RcloneProgressParser {
    fn parse(&self, line: &str) -> Option<ProgressDelta> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (level, body) = match LOG_PREFIX.captures(line) {
            Some(caps) => {
                let level = caps["level"].to_string();
                let end = caps.get(0).map_or(0, |m| m.end());
                (Some(level), line[end..].trim())
            }
            None => match line.strip_prefix("ERROR") {
                Some(rest) if rest.trim_start().starts_with(':') => {
                    (Some("ERROR".to_string()), rest.trim_start()[1..].trim())
                }
                _ => (None, line),
            },
        };

        if level.as_deref() == Some("ERROR") {
            return Some(Self::parse_error(body));
        }

        if let Some(caps) = FILES_LINE.captures(body) {
            return Some(ProgressDelta {
                files_transferred: caps["done"].parse().ok(),
                total_files: caps["total"].parse().ok(),
                ..ProgressDelta::default()
            });
        }

        if let Some(caps) = BYTES_LINE.captures(body) {
            let delta = ProgressDelta {
                bytes_transferred: parse_size(&caps["done"]),
                total_bytes: parse_size(&caps["total"]),
                speed: caps
                    .name("speed")
                    .and_then(|m| parse_size(m.as_str()))
                    .map(|b| b as f64),
                ..ProgressDelta::default()
            };
            return (!delta.is_empty()).then_some(delta);
        }

        None
    }
}

/// Parse sizes like `1.5 MiB`, `652.6 MB`, `128 B` into bytes.
pub fn parse_size(size: &str) -> Option<u64> {
    let size = size.trim();
    let split = size.find(|c: char| c.is_ascii_alphabetic())?;
    let value: f64 = size[..split].trim().parse().ok()?;
    let multiplier: f64 = match size[split..].to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" | "KIB" => 1024.0,
        "MB" | "MIB" => 1024.0 * 1024.0,
        "GB" | "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TB" | "TIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "PB" | "PIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier) as u64)
}
