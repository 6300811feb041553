//! Tag and content search

use anyhow::{bail, Result};
use colored::*;

use searchive::tags::database::Document;
use searchive::DocumentService;

pub async fn run(
    service: &DocumentService,
    query: Option<&str>,
    tags: &[String],
    limit: usize,
    json: bool,
) -> Result<()> {
    match (query, tags.is_empty()) {
        (None, false) => run_tag_search(service, tags, json).await,
        (Some(query), true) => run_content_search(service, query, limit, json).await,
        (Some(_), false) => bail!("Use either a query or --tag, not both"),
        (None, true) => bail!("Give a query or at least one --tag"),
    }
}

async fn run_tag_search(service: &DocumentService, tags: &[String], json: bool) -> Result<()> {
    let documents = service.search_by_tags(tags).await?;

    if json {
        return super::print_json(&documents);
    }

    let label = tags.join(", ");
    if documents.is_empty() {
        println!("{} No documents tagged: {}", "→".dimmed(), label.cyan());
        return Ok(());
    }

    println!(
        "{} {} documents tagged: {}",
        "→".dimmed(),
        documents.len(),
        label.cyan()
    );
    println!();
    for document in &documents {
        print_document(document);
    }
    Ok(())
}

async fn run_content_search(
    service: &DocumentService,
    query: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let hits = service.search_by_content(query, limit).await?;

    if json {
        return super::print_json(&hits);
    }

    if hits.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!("{} {} results for: {}", "→".dimmed(), hits.len(), query.cyan());
    println!();
    for (i, hit) in hits.iter().enumerate() {
        print!("{}. [{}] ", (i + 1).to_string().bold(), format!("{:.2}", hit.score).green());
        print_document(&hit.document);
    }
    Ok(())
}

fn print_document(document: &Document) {
    println!(
        "{} {} {}",
        format!("[{}]", document.id).dimmed(),
        super::truncate(&document.filename, 60).cyan(),
        document.uploaded_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
    );
}
