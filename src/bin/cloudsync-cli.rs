use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cloudsync_lib::config::AppConfig;
use cloudsync_lib::logging::init_tracing;
use cloudsync_lib::path_validation::verify_path_exists;
use cloudsync_lib::{
    get_app_version, CloudRemote, RemotesRegistry, SyncTask, TaskKind, TaskStatus, TaskStore,
    TransferOrchestrator,
};

#[derive(Parser)]
#[command(name = "cloudsync-cli")]
#[command(about = "Cloud sync and transfer CLI driven by rclone", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Upload limit in Mbit/s (0 = unlimited)
    #[arg(long, global = true)]
    upload_limit: Option<f64>,

    /// Download limit in Mbit/s (0 = unlimited)
    #[arg(long, global = true)]
    download_limit: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a sync, backup or transfer between two remotes
    Run {
        #[arg(short, long, value_enum, default_value_t = KindArg::Backup)]
        kind: KindArg,

        /// Source remote name or id
        #[arg(long, default_value = "Local Storage")]
        from: String,

        #[arg(short, long)]
        source: String,

        /// Destination remote name or id
        #[arg(long)]
        to: String,

        #[arg(short, long)]
        target: String,

        #[arg(short, long)]
        name: Option<String>,
    },
    /// List the contents of a remote directory
    Ls {
        remote: String,
        #[arg(default_value = "")]
        path: String,
    },
    /// Show configured remotes
    Remotes,
    /// Show finished runs, newest first
    History {
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Sync,
    Backup,
    Transfer,
}

impl From<KindArg> for TaskKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Sync => TaskKind::Sync,
            KindArg::Backup => TaskKind::Backup,
            KindArg::Transfer => TaskKind::Transfer,
        }
    }
}

fn default_config_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cloudsync/config.yaml")
}

fn load_registry(config: &AppConfig) -> anyhow::Result<RemotesRegistry> {
    let registry = RemotesRegistry::load(&config.remotes_path())?;
    if !registry.is_empty() {
        return Ok(registry);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
    Ok(RemotesRegistry::with_local(home))
}

fn find_remote<'a>(registry: &'a RemotesRegistry, key: &str) -> anyhow::Result<&'a CloudRemote> {
    let id = key.parse().ok();
    registry
        .sorted()
        .into_iter()
        .find(|r| Some(r.id) == id || r.name.eq_ignore_ascii_case(key))
        .and_then(|r| registry.get(r.id))
        .ok_or_else(|| anyhow::anyhow!("Unknown remote: {key}"))
}

fn format_bytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1_048_576.0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing("info")?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = AppConfig::load(&config_path)?;
    if let Some(up) = cli.upload_limit {
        config.bandwidth.upload_mbps = up;
    }
    if let Some(down) = cli.download_limit {
        config.bandwidth.download_mbps = down;
    }
    config.validate()?;

    let registry = load_registry(&config)?;

    match cli.command {
        Command::Remotes => {
            println!("☁️  cloudsync {}", get_app_version());
            println!("{:<24} {:<16} {:<12} {:<10}", "NAME", "PROVIDER", "CONNECTION", "READY");
            println!("{}", "-".repeat(64));
            for remote in registry.sorted() {
                println!(
                    "{:<24} {:<16} {:<12} {:<10}",
                    remote.name,
                    remote.provider.display_name(),
                    remote.connection_name(),
                    if remote.is_configured { "yes" } else { "no" }
                );
            }
        }
        Command::History { clear } => {
            let mut store = TaskStore::open(config.tasks_path(), config.history_path())?;
            if clear {
                store.clear_history()?;
                println!("🧹 History cleared");
                return Ok(());
            }
            for task in store.history() {
                println!(
                    "{:<24} {:<20} {:>6}/{:<6} {}",
                    task.name,
                    format!("{:?}", task.status()),
                    task.files_transferred,
                    task.total_files,
                    task.completed_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                );
            }
        }
        Command::Ls { remote, path } => {
            let remote_id = find_remote(&registry, &remote)?.id;
            let orchestrator = TransferOrchestrator::from_config(&config, registry);
            let entries = orchestrator.list(remote_id, &path).await?;
            for entry in entries {
                let size = entry
                    .size_bytes()
                    .map(format_bytes)
                    .unwrap_or_else(|| "-".to_string());
                let marker = if entry.is_dir { "📁" } else { "📄" };
                println!("{marker} {:<40} {:>12} {}", entry.path, size, entry.mod_time.to_rfc3339());
            }
        }
        Command::Run {
            kind,
            from,
            source,
            to,
            target,
            name,
        } => {
            let source_remote = find_remote(&registry, &from)?;
            let destination_remote = find_remote(&registry, &to)?;
            if source_remote.provider.is_local() {
                verify_path_exists(Path::new(&source_remote.remote_spec(&source)))
                    .map_err(|e| anyhow::anyhow!(e))?;
            }

            let task = SyncTask::new(
                name.unwrap_or_else(|| format!("{from} → {to}")),
                kind.into(),
                source_remote.id,
                source,
                destination_remote.id,
                target,
            );
            run_task(&config, registry, task).await?;
        }
    }

    Ok(())
}

async fn run_task(config: &AppConfig, registry: RemotesRegistry, task: SyncTask) -> anyhow::Result<()> {
    let mut store = TaskStore::open(config.tasks_path(), config.history_path())?;
    store.create_task(task.clone())?;

    let orchestrator = TransferOrchestrator::from_config(config, registry);
    println!("🚀 Starting {:?}: {}", task.kind, task.name);

    let mut handle = match orchestrator.start(task.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            store.delete(&task.id)?;
            anyhow::bail!("❌ {e}");
        }
    };
    let task_id = handle.task_id().to_string();

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({msg})")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    loop {
        tokio::select! {
            delta = handle.next_delta() => match delta {
                Some(delta) => {
                    if let Some(file) = delta.failed_file {
                        pb.println(format!("   ⚠️  {file}"));
                    }
                    let snapshot = handle.snapshot();
                    pb.set_length(snapshot.total_bytes);
                    pb.set_position(snapshot.bytes_transferred);
                    pb.set_message(format!("{}/{} files", snapshot.files_transferred, snapshot.total_files));
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                pb.set_message("cancelling...");
                orchestrator.cancel(&task_id).await?;
            }
        }
    }

    let finished = handle.finish().await?;
    store.update(finished.clone())?;
    store.move_to_history(&finished.id)?;

    match finished.status() {
        TaskStatus::Completed => pb.finish_with_message("✅ done"),
        TaskStatus::Cancelled => pb.abandon_with_message("⏹️  cancelled"),
        _ => pb.abandon_with_message("❌ failed"),
    }

    println!();
    println!("📊 Results:");
    println!("   Status: {:?}", finished.status());
    println!("   Files: {}/{}", finished.files_transferred, finished.total_files);
    println!("   Transferred: {}", format_bytes(finished.bytes_transferred));
    if let Some(speed) = finished.average_speed() {
        println!("   Average speed: {}/s", format_bytes(speed as u64));
    }
    if let Some(summary) = finished.failure_summary() {
        println!("   {summary}");
    }
    for file in &finished.failed_files {
        eprintln!("   ⚠️  {file}");
    }
    if let Some(error) = &finished.error {
        eprintln!("❌ {}: {}", error.title(), error.user_message());
        eprintln!("   {}", error.recovery_suggestion());
    }

    if matches!(finished.status(), TaskStatus::Failed | TaskStatus::PartiallyCompleted) {
        std::process::exit(1);
    }
    Ok(())
}
