//! Tag inspection and index maintenance

use anyhow::{Context, Result};
use colored::*;

use searchive::tags::database::DocumentId;
use searchive::DocumentService;

use super::pad;

pub async fn run_list(service: &DocumentService, limit: Option<usize>, json: bool) -> Result<()> {
    let mut usage = service.database().tag_usage()?;
    if let Some(limit) = limit {
        usage.truncate(limit);
    }

    if json {
        return super::print_json(&usage);
    }

    println!("{}", "Tag Usage (sorted by count):".cyan().bold());
    println!("{}", "-".repeat(60));

    if usage.is_empty() {
        println!("  {}", "No tags yet.".dimmed());
    }
    for entry in &usage {
        let count_str = format!("{:>3}", entry.document_count);
        let count_colored = if entry.document_count >= 5 {
            count_str.green()
        } else if entry.document_count >= 2 {
            count_str.yellow()
        } else {
            count_str.red()
        };
        let marker = if entry.tag.embedding.is_none() {
            " (no embedding)".dimmed()
        } else {
            "".normal()
        };
        println!(
            "  {} × {}{}{}",
            count_colored,
            pad(&entry.tag.name, 30),
            format!("#{}", entry.tag.id).dimmed(),
            marker
        );
    }
    Ok(())
}

pub async fn run_show(service: &DocumentService, document_id: i64, json: bool) -> Result<()> {
    let id = DocumentId(document_id);
    let document = service.find_document(id).await?;
    let tags = service.tags_for_document(id).await?;

    if json {
        return super::print_json(&serde_json::json!({
            "document": document,
            "tags": tags,
        }));
    }

    println!(
        "{} [{}] {}",
        document.filename.bold(),
        document.id,
        document
            .extraction_method
            .as_deref()
            .unwrap_or("not tagged")
            .dimmed()
    );
    if tags.is_empty() {
        println!("  {}", "No tags.".dimmed());
    }
    for tag in &tags {
        println!("  #{}", tag.name.cyan());
    }
    Ok(())
}

pub async fn run_similar(
    service: &DocumentService,
    name: &str,
    threshold: Option<f32>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let threshold = threshold.unwrap_or(service.resolver().threshold());
    let hits = service
        .resolver()
        .similar_tags(service.database(), name, threshold, limit)
        .await
        .with_context(|| format!("Failed to find tags similar to '{}'", name))?;

    if json {
        return super::print_json(&hits);
    }

    if hits.is_empty() {
        println!(
            "{} No tags within similarity {:.2} of {}",
            "→".dimmed(),
            threshold,
            name.cyan()
        );
        return Ok(());
    }

    println!("{}", format!("Merge candidates for '{}'", name).bold());
    println!("{}", "-".repeat(50));
    for hit in &hits {
        let score = format!("{:.2}", hit.score);
        let score = if hit.score >= 0.9 {
            score.green()
        } else {
            score.yellow()
        };
        println!("  [{}] {} {}", score, pad(&hit.name, 30), format!("#{}", hit.id).dimmed());
    }
    Ok(())
}

pub async fn run_reconcile(service: &DocumentService, json: bool) -> Result<()> {
    let report = service
        .sync()
        .reconcile()
        .await
        .context("Tag index reconciliation failed")?;

    if json {
        return super::print_json(&report);
    }

    if report.is_clean() {
        println!("{} Tag index already in sync", "✓".green());
        return Ok(());
    }

    println!("{} Re-mirrored {} tags", "✓".green(), report.mirrored.len());
    println!("{} Removed {} orphaned entries", "✓".green(), report.removed.len());
    if !report.failed.is_empty() {
        println!(
            "{} {} tags could not be mirrored; run again later",
            "⚠".yellow(),
            report.failed.len()
        );
    }
    Ok(())
}

pub async fn run_audit(service: &DocumentService, json: bool) -> Result<()> {
    let audit = service.sync().audit().await?;

    if json {
        super::print_json(&audit)?;
    } else {
        println!("{}", "Tag Index Audit".bold());
        println!("{}", "=".repeat(50));
        println!("Tags:               {}", audit.tags);
        println!("  with embedding:   {}", audit.with_embedding);
        println!("  without:          {}", audit.without_embedding);
        println!("Mirrored:           {}", audit.mirrored);
        println!("Unmirrored:         {}", audit.unmirrored.len());
        println!("Orphaned entries:   {}", audit.orphans.len());
        println!();
        if audit.is_consistent() {
            println!("{} Consistent", "✓".green());
        } else {
            println!(
                "{}",
                "⚠️  Inconsistent. Run `searchive tags reconcile`.".yellow()
            );
        }
    }

    if !audit.is_consistent() {
        std::process::exit(1);
    }
    Ok(())
}
