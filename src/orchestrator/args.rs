//! Argument vectors for rclone invocations.
//!
//! Every function here takes already-validated endpoint strings; nothing in
//! this module touches raw user input.

use std::path::Path;

use walkdir::WalkDir;

use crate::config::{BandwidthLimits, TransferSettings};
use crate::remotes::ProviderType;
use crate::sync_task::TaskKind;

/// Local sources with more files than this get extra parallel transfers.
pub const MANY_FILES_THRESHOLD: usize = 20;
const BOOSTED_TRANSFERS_MIN: usize = 8;
const BOOSTED_TRANSFERS_MAX: usize = 16;

/// Resolved endpoints for one transfer.
#[derive(Debug, Clone)]
pub struct TransferEndpoints {
    pub source: String,
    pub destination: String,
    pub destination_provider: ProviderType,
    /// Number of files under a local source directory, when known.
    pub local_file_count: Option<usize>,
}

fn subcommand(kind: TaskKind) -> &'static [&'static str] {
    match kind {
        TaskKind::Sync => &["sync"],
        TaskKind::Backup => &["copy"],
        TaskKind::Transfer => &["copy", "--ignore-existing"],
    }
}

/// `--bwlimit UP:DOWN`, or nothing when both directions are unlimited.
pub fn bandwidth_args(limits: &BandwidthLimits) -> Vec<String> {
    if limits.is_unlimited() {
        return Vec::new();
    }
    vec![
        "--bwlimit".to_string(),
        format!(
            "{}:{}",
            rate(limits.upload_mbps),
            rate(limits.download_mbps)
        ),
    ]
}

fn rate(value: f64) -> String {
    if value > 0.0 {
        format!("{value}M")
    } else {
        "off".to_string()
    }
}

/// Parallel transfer count for a run; large local trees get more workers.
pub fn transfer_count(configured: u32, local_file_count: Option<usize>) -> u32 {
    match local_file_count {
        Some(files) if files > MANY_FILES_THRESHOLD => {
            let boosted = (files / 10).clamp(BOOSTED_TRANSFERS_MIN, BOOSTED_TRANSFERS_MAX);
            boosted as u32
        }
        _ => configured,
    }
}

/// Count regular files under `dir`. Unreadable entries are skipped.
pub fn count_local_files(dir: &Path) -> Option<usize> {
    if !dir.is_dir() {
        return None;
    }
    let count = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count();
    Some(count)
}

fn global_args(settings: &TransferSettings) -> Vec<String> {
    match &settings.rclone_config {
        Some(path) => vec![
            "--config".to_string(),
            path.to_string_lossy().into_owned(),
        ],
        None => Vec::new(),
    }
}

pub fn transfer_args(
    kind: TaskKind,
    endpoints: &TransferEndpoints,
    settings: &TransferSettings,
) -> Vec<String> {
    let mut args: Vec<String> = subcommand(kind).iter().map(|s| s.to_string()).collect();
    args.push(endpoints.source.clone());
    args.push(endpoints.destination.clone());
    args.extend(global_args(settings));

    args.extend([
        "--stats".to_string(),
        settings.stats_interval.clone(),
        "-v".to_string(),
        "--transfers".to_string(),
        transfer_count(settings.transfers, endpoints.local_file_count).to_string(),
        "--checkers".to_string(),
        settings.checkers.to_string(),
    ]);

    if let Some(flag) = endpoints.destination_provider.chunk_size_flag() {
        args.push(flag);
    }

    for pattern in &settings.exclude_patterns {
        let pattern = pattern.trim();
        if !pattern.is_empty() {
            args.push("--exclude".to_string());
            args.push(pattern.to_string());
        }
    }

    args.extend(bandwidth_args(&settings.bandwidth));
    args
}

pub fn list_args(target: &str, settings: &TransferSettings) -> Vec<String> {
    let mut args = vec!["lsjson".to_string(), target.to_string()];
    args.extend(global_args(settings));
    args
}

pub fn delete_file_args(target: &str, settings: &TransferSettings) -> Vec<String> {
    let mut args = vec!["deletefile".to_string(), target.to_string()];
    args.extend(global_args(settings));
    args
}

pub fn delete_folder_args(target: &str, settings: &TransferSettings) -> Vec<String> {
    let mut args = vec!["purge".to_string(), target.to_string()];
    args.extend(global_args(settings));
    args
}

pub fn rename_args(from: &str, to: &str, settings: &TransferSettings) -> Vec<String> {
    let mut args = vec!["moveto".to_string(), from.to_string(), to.to_string()];
    args.extend(global_args(settings));
    args
}

pub fn create_folder_args(target: &str, settings: &TransferSettings) -> Vec<String> {
    let mut args = vec!["mkdir".to_string(), target.to_string()];
    args.extend(global_args(settings));
    args
}
