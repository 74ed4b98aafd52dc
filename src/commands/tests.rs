use super::*;
use crate::embeddings::chunking::Position;
use crate::indexer::{DrainReport, OperationKind, ScanReport};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn result() -> SearchResult {
    SearchResult {
        filename: "rust.md".to_string(),
        text: "Ownership   rules\nkeep memory safe.".to_string(),
        contextualized_text: "About ownership.\n\nOwnership rules keep memory safe.".to_string(),
        heading_context: Some("# Rust > ## Ownership".to_string()),
        start: Position::new(4, 0),
        end: Position::new(5, 17),
        score: 0.875,
    }
}

#[test]
fn explicit_config_dir_is_used() {
    let dir = PathBuf::from("/tmp/somewhere");
    assert_eq!(
        resolve_config_dir(Some(dir.clone())).expect("dir should resolve"),
        dir
    );
}

#[test]
fn missing_notes_dir_is_reported() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut config = Config::load(temp_dir.path()).expect("Failed to load defaults");
    config.notes_dir = temp_dir.path().join("missing");
    config.save().expect("Failed to save config");

    let error = load_config(temp_dir.path()).expect_err("missing notes dir should fail");
    assert!(error.to_string().contains("does not exist"));

    config.notes_dir = temp_dir.path().to_path_buf();
    config.save().expect("Failed to save config");
    let loaded = load_config(temp_dir.path()).expect("config should load");
    assert_eq!(loaded.notes_dir, temp_dir.path());
}

#[test]
fn search_result_shows_location_and_score() {
    let formatted = format_search_result(1, &result(), false);

    assert!(formatted.contains("1. rust.md:5:1 (score 0.875)"));
    assert!(formatted.contains("# Rust > ## Ownership"));
    assert!(formatted.contains("Ownership rules keep memory safe."));
    assert!(!formatted.contains("About ownership."));
}

#[test]
fn contextualized_search_result() {
    let formatted = format_search_result(2, &result(), true);

    assert!(formatted.contains("2. rust.md"));
    assert!(formatted.contains("About ownership. Ownership rules"));
}

#[test]
fn long_previews_are_truncated() {
    let text = "word ".repeat(100);
    let shortened = preview(&text, 12);

    assert_eq!(shortened, "word word wo…");
    assert_eq!(preview("short", 12), "short");
}

#[test]
fn stats_list_recent_activity() {
    let stats = IndexStats {
        total_files: 3,
        total_chunks: 12,
        queue_depth: 1,
        recent_activity: vec![ActivityEntry {
            filename: "a.md".to_string(),
            kind: OperationKind::Index,
            chunk_count: 4,
            timestamp: Utc
                .with_ymd_and_hms(2024, 5, 1, 12, 30, 0)
                .single()
                .expect("valid timestamp"),
        }],
    };

    let formatted = format_stats(&stats);

    assert!(formatted.contains("Files: 3"));
    assert!(formatted.contains("Chunks: 12"));
    assert!(formatted.contains("Queued: 1"));
    assert!(formatted.contains("2024-05-01 12:30:00 index a.md (4 chunks)"));
}

#[test]
fn stats_without_activity() {
    let stats = IndexStats {
        total_files: 0,
        total_chunks: 0,
        queue_depth: 0,
        recent_activity: vec![],
    };

    assert!(!format_stats(&stats).contains("Recent activity"));
}

#[test]
fn reindex_report_mentions_failures() {
    let clean = ReindexReport {
        scan: ScanReport {
            unchanged: 4,
            ..ScanReport::default()
        },
        drain: DrainReport {
            processed: 2,
            failed: 0,
        },
    };
    assert_eq!(
        format_reindex_report(&clean),
        "✅ Indexed 2 changes (4 unchanged, 0 touched)"
    );

    let failing = ReindexReport {
        scan: ScanReport {
            errors: 1,
            ..ScanReport::default()
        },
        drain: DrainReport {
            processed: 0,
            failed: 3,
        },
    };
    let formatted = format_reindex_report(&failing);
    assert!(formatted.contains("3 files failed"));
    assert!(formatted.contains("1 files could not be read"));
}
