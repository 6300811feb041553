pub mod delete;
pub mod ingest;
pub mod init;
pub mod keywords;
pub mod search;
pub mod status;
pub mod tags;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use unicode_width::UnicodeWidthStr;

use searchive::core::paths::get_data_root;
use searchive::{DataPaths, DocumentService};

/// Open the service for the resolved data directory
pub fn open_service(data_dir: Option<&Path>) -> Result<DocumentService> {
    let root = get_data_root(data_dir);
    let paths = DataPaths::from_root(root.clone());
    DocumentService::open(&paths)
        .with_context(|| format!("Failed to open data directory {}", root.display()))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Pad to a display width; wide (CJK) characters count as two columns
pub fn pad(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    if used >= width {
        text.to_string()
    } else {
        format!("{}{}", text, " ".repeat(width - used))
    }
}

/// Char-aware truncation for display
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
