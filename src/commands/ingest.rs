//! Ingest text files and auto-tag them

use anyhow::{bail, Context, Result};
use colored::*;
use glob::Pattern;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use searchive::ingest::UploadOutcome;
use searchive::tags::resolver::Resolution;
use searchive::{DocumentService, NewDocument};

#[derive(Serialize)]
struct IngestReport {
    ingested: Vec<UploadOutcome>,
    skipped: Vec<Skipped>,
}

#[derive(Serialize)]
struct Skipped {
    path: String,
    reason: String,
}

pub async fn run(
    service: &DocumentService,
    path: &Path,
    pattern: Option<&str>,
    json: bool,
) -> Result<()> {
    let pattern = pattern
        .map(Pattern::new)
        .transpose()
        .context("Invalid --pattern")?;
    let files = collect_files(path, pattern.as_ref())?;
    if files.is_empty() {
        bail!("No matching files under {}", path.display());
    }

    let mut report = IngestReport {
        ingested: Vec::new(),
        skipped: Vec::new(),
    };

    for file in &files {
        let content = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                report.skipped.push(Skipped {
                    path: file.display().to_string(),
                    reason: format!("not readable as UTF-8 text: {}", e),
                });
                continue;
            }
        };

        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        let outcome = service
            .upload(NewDocument {
                filename,
                file_type: file_type_for(file).to_string(),
                content,
            })
            .await
            .with_context(|| format!("Failed to ingest {}", file.display()))?;

        if !json {
            print_outcome(&outcome);
        }
        report.ingested.push(outcome);
    }

    if json {
        super::print_json(&report)?;
    } else {
        for skipped in &report.skipped {
            println!("{} {} ({})", "⚠".yellow(), skipped.path, skipped.reason.dimmed());
        }
        println!();
        println!(
            "{} {} ingested, {} skipped",
            "→".dimmed(),
            report.ingested.len().to_string().bold(),
            report.skipped.len()
        );
    }

    Ok(())
}

fn collect_files(path: &Path, pattern: Option<&Pattern>) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("Path not found: {}", path.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            pattern.map_or(true, |p| p.matches(&e.file_name().to_string_lossy()))
        })
        .map(|e| e.into_path())
        .collect();

    files.sort();
    Ok(files)
}

/// MIME type recorded on the document row
pub fn file_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "text/plain",
    }
}

fn print_outcome(outcome: &UploadOutcome) {
    println!(
        "{} {} [{}] {}",
        "✓".green(),
        outcome.document.filename.bold(),
        outcome.document.id,
        outcome.method.to_string().dimmed()
    );

    for resolved in &outcome.tags {
        let label = match resolved.resolution {
            Resolution::Exact => "existing".normal(),
            Resolution::Similar { score } => format!("merged {:.2}", score).yellow(),
            Resolution::Created => "new".green(),
        };
        println!("   #{} ({})", resolved.tag.name.cyan(), label);
    }
}
