//! Test logging support.
//!
//! Integration tests call [`init_global_test_logging`] once, typically from
//! a `#[ctor::ctor]` hook:
//!
//! ```ignore
//! #[ctor::ctor]
//! fn setup() {
//!     kverify_common::testing::init_global_test_logging();
//! }
//! ```
//!
//! Events are written as JSON lines to `target/test-logs/kverify_tests.jsonl`
//! and in compact form through the test writer, so they show up next to
//! failing assertions.
//!
//! - `KVERIFY_TEST_LOG_FILE`: override the JSONL path
//! - `KVERIFY_TEST_LOG_LEVEL`: level for the kverify crates (default `info`)

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install the test subscriber. Safe to call from every test.
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let test_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var("KVERIFY_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "kverify={level},kverify_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(test_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file() -> Option<File> {
    if let Ok(custom_path) = std::env::var("KVERIFY_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return File::create(&custom_path).ok();
    }

    let log_dir = find_target_dir().join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    File::create(log_dir.join("kverify_tests.jsonl")).ok()
}

/// Walk up from the current directory to the nearest `target/`.
fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_global_test_logging();
        init_global_test_logging();
        tracing::info!("test logging initialized");
    }
}
