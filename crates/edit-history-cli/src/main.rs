use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edit_history::{HistoryStore, StoreConfig, StoreStatistics};

/// Inspect and maintain a durable edit-history store.
#[derive(Parser, Debug)]
#[command(name = "histctl", version, about)]
struct Cli {
    /// JSON config file with `data_dir` and `max_age_days`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the data directory holding `history.redb`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show aggregate statistics across all contexts.
    Stats,
    /// List every stored history, oldest first.
    List,
    /// Delete histories not modified within the retention window.
    Cleanup {
        /// Overrides the configured retention in days.
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Delete the stored history of one context.
    Delete {
        /// Context id, e.g. a project id.
        context: String,
    },
    /// Delete every stored history.
    Purge {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        let mut config = match &self.config {
            Some(path) => StoreConfig::load_or_default(path),
            None => StoreConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Command::Cleanup {
            max_age_days: Some(days),
        } = self.command
        {
            config.max_age_days = days;
        }
        config.sanitized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = cli.store_config();
    tracing::debug!("Using history store at {}", config.database_path().display());

    let store = HistoryStore::new(config);
    store
        .initialize()
        .await
        .context("Failed to open history store")?;

    match cli.command {
        Command::Stats => {
            let stats = store
                .get_statistics()
                .await
                .context("Failed to read statistics")?;
            print!("{}", render_statistics(&stats));
        }
        Command::List => {
            let histories = store
                .list_histories()
                .await
                .context("Failed to list histories")?;
            if histories.is_empty() {
                println!("No stored histories.");
            }
            for summary in histories {
                println!(
                    "{}  {}  undo={} redo={} {}",
                    summary.last_modified.format("%Y-%m-%d %H:%M:%S"),
                    summary.context_id,
                    summary.undo_len,
                    summary.redo_len,
                    format_bytes(summary.size_bytes),
                );
            }
        }
        Command::Cleanup { .. } => {
            let removed = store
                .cleanup_old_history()
                .await
                .context("Failed to clean up old histories")?;
            println!(
                "Removed {removed} histories older than {} days.",
                store.config().max_age_days
            );
        }
        Command::Delete { context } => {
            let existed = store
                .delete_history(&context)
                .await
                .with_context(|| format!("Failed to delete history for '{context}'"))?;
            if existed {
                println!("Deleted history for '{context}'.");
            } else {
                println!("No history stored for '{context}'.");
            }
        }
        Command::Purge { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every history without --yes");
            }
            let removed = store
                .delete_all_history()
                .await
                .context("Failed to delete histories")?;
            println!("Deleted {removed} histories.");
        }
    }

    store.close().await;
    Ok(())
}

fn render_statistics(stats: &StoreStatistics) -> String {
    let stamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "contexts:        {}\nhistory entries: {}\ntotal size:      {}\noldest:          {}\nnewest:          {}\n",
        stats.total_entries,
        stats.total_history_entries,
        format_bytes(stats.total_size),
        stamp(stats.oldest_entry),
        stamp(stats.newest_entry),
    )
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cleanup_override_applies_to_config() {
        let cli = Cli::parse_from([
            "histctl",
            "--data-dir",
            "/tmp/histories",
            "cleanup",
            "--max-age-days",
            "3",
        ]);
        let config = cli.store_config();
        assert_eq!(config.max_age_days, 3);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/histories"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_render_empty_statistics() {
        let rendered = render_statistics(&StoreStatistics::default());
        assert!(rendered.contains("contexts:        0"));
        assert!(rendered.contains("oldest:          -"));
    }
}
