#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::ollama::OllamaClient;
use crate::indexer::{ActivityEntry, IndexStats, Indexer, ReindexReport};
use crate::search::SearchResult;

const PREVIEW_CHARS: usize = 240;

/// The configuration directory given on the command line, or `~/.notes-index`
#[inline]
pub fn resolve_config_dir(config_dir: Option<PathBuf>) -> Result<PathBuf> {
    config_dir.map_or_else(
        || Config::config_dir().context("Failed to determine configuration directory"),
        Ok,
    )
}

#[inline]
pub fn load_config(config_dir: &Path) -> Result<Config> {
    let config = Config::load(config_dir)?;
    if !config.notes_dir.is_dir() {
        anyhow::bail!(
            "Notes directory {} does not exist. Run 'notes-index config' to set it.",
            config.notes_dir.display()
        );
    }
    Ok(config)
}

async fn open_indexer(config: &Config) -> Result<Indexer> {
    Indexer::from_config(config)
        .await
        .context("Failed to open the notes index")
}

/// Scan the notes directory once and process every change it finds
#[inline]
pub async fn reindex(config: &Config) -> Result<()> {
    let indexer = open_indexer(config).await?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} Indexing {msg}")
                .context("Invalid progress template")?,
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(config.notes_dir.display().to_string());
    bar.enable_steady_tick(Duration::from_millis(120));

    let report = indexer.reindex().await;
    bar.finish_and_clear();
    let report = report?;

    println!("{}", format_reindex_report(&report));
    Ok(())
}

#[inline]
pub fn format_reindex_report(report: &ReindexReport) -> String {
    let mut lines = vec![format!(
        "✅ Indexed {} changes ({} unchanged, {} touched)",
        report.drain.processed, report.scan.unchanged, report.scan.touched
    )];
    if report.drain.failed > 0 {
        lines.push(format!(
            "⚠️  {} files failed and will be retried on the next scan",
            report.drain.failed
        ));
    }
    if report.scan.errors > 0 {
        lines.push(format!("⚠️  {} files could not be read", report.scan.errors));
    }
    lines.join("\n")
}

/// Print the chunks closest to `query`
#[inline]
pub async fn search(config: &Config, query: &str, top_k: usize, contextualized: bool) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let results = indexer.search(query, top_k).await?;

    if results.is_empty() {
        println!("No results. Run 'notes-index reindex' if the index is empty.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!("{}", format_search_result(rank.saturating_add(1), result, contextualized));
        println!();
    }
    Ok(())
}

#[inline]
pub fn format_search_result(rank: usize, result: &SearchResult, contextualized: bool) -> String {
    let text = if contextualized {
        &result.contextualized_text
    } else {
        &result.text
    };

    let mut header = format!(
        "{}. {}:{} (score {:.3})",
        rank, result.filename, result.start, result.score
    );
    if let Some(heading) = &result.heading_context {
        header = format!("{header}\n   {heading}");
    }

    format!("{}\n   {}", style(header).bold(), preview(text, PREVIEW_CHARS))
}

fn preview(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        flattened
    } else {
        let cut: String = flattened.chars().take(max_chars).collect();
        format!("{}…", cut.trim_end())
    }
}

/// Print file and chunk counts, the queue and recent activity
#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let stats = indexer.get_stats().await?;

    println!("{}", style("📊 Notes Index").bold().cyan());
    println!("{}", "=".repeat(40));
    println!("Notes directory: {}", config.notes_dir.display());
    println!("Vector table: {}", indexer.vector_table().table_name);
    println!("{}", format_stats(&stats));

    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => println!("🤖 Ollama: connected ({})", config.ollama.model),
            Err(e) => println!("🤖 Ollama: {} - {}", style("unavailable").red(), e),
        },
        Err(e) => println!("🤖 Ollama: {} - {}", style("misconfigured").red(), e),
    }

    Ok(())
}

#[inline]
pub fn format_stats(stats: &IndexStats) -> String {
    let mut lines = vec![
        format!("Files: {}", stats.total_files),
        format!("Chunks: {}", stats.total_chunks),
        format!("Queued: {}", stats.queue_depth),
    ];

    if !stats.recent_activity.is_empty() {
        lines.push("Recent activity:".to_string());
        lines.extend(stats.recent_activity.iter().map(format_activity));
    }
    lines.join("\n")
}

fn format_activity(entry: &ActivityEntry) -> String {
    format!(
        "  {} {} {} ({} chunks)",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.kind,
        entry.filename,
        entry.chunk_count
    )
}

/// Keep the index up to date until interrupted
#[inline]
pub async fn watch(config: &Config) -> Result<()> {
    let indexer = open_indexer(config).await?;

    println!(
        "👀 Watching {} (scanning every {}s)",
        config.notes_dir.display(),
        config.indexer.scan_interval_secs
    );
    println!("Press Ctrl+C to stop");

    let scanner = indexer.spawn_scanner(config.indexer.scan_interval());
    let processor = indexer.spawn_processor(config.indexer.poll_interval());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for interrupt signal")?;
    println!("\n📴 Received interrupt signal, shutting down...");

    for handle in [scanner, processor] {
        handle.abort();
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Background task ended with an error: {}", e),
        }
    }

    let pending = indexer.queue_size().await;
    if pending > 0 {
        info!("{} operations left in the queue, they will be found by the next scan", pending);
    }

    println!("✅ Shutdown complete");
    Ok(())
}

/// Validate the index and optionally repair it
#[inline]
pub async fn check(config: &Config, fix: bool) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let report = indexer.validate_consistency().await?;

    println!("{}", report.summary());

    if report.is_consistent {
        return Ok(());
    }

    if fix {
        indexer.cleanup_inconsistencies(&report).await?;
        let rescan = indexer.reindex().await?;
        println!("🔧 Repaired index");
        println!("{}", format_reindex_report(&rescan));
    } else {
        println!("Run 'notes-index check --fix' to repair the index");
    }
    Ok(())
}

/// Drop vector tables left behind by other models or embedding versions
#[inline]
pub async fn prune(config: &Config) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let dropped = indexer.prune_stale_tables().await?;

    if dropped == 0 {
        println!("No stale vector tables");
    } else {
        println!("🗑️  Dropped {dropped} stale vector tables");
        indexer
            .database()
            .optimize()
            .await
            .context("Failed to compact database")?;
    }
    Ok(())
}
