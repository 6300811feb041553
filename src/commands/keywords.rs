//! Dry-run keyword extraction

use anyhow::{bail, Context, Result};
use colored::*;
use std::path::Path;

use searchive::tags::database::DocumentId;
use searchive::tags::resolver::prepare_names;
use searchive::DocumentService;

pub async fn run(
    service: &DocumentService,
    file: Option<&Path>,
    document: Option<i64>,
    json: bool,
) -> Result<()> {
    let (text, document_id) = match (file, document) {
        (Some(path), None) => (
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None,
        ),
        (None, Some(id)) => {
            let id = DocumentId(id);
            (service.document_content(id).await?, Some(id))
        }
        _ => bail!("Give either a file or --document <id>"),
    };

    let extraction = service.extract_keywords(&text, document_id).await;

    if json {
        return super::print_json(&serde_json::json!({
            "keywords": extraction.keywords,
            "tag_names": prepare_names(&extraction.keywords),
            "method": extraction.method,
            "corpus_size": extraction.corpus_size,
        }));
    }

    println!("{}", "Extracted Keywords".bold());
    println!("{}", "=".repeat(50));
    println!(
        "Strategy: {} (corpus: {} documents, threshold {})",
        extraction.method.to_string().cyan(),
        extraction.corpus_size,
        service.config().extraction.threshold
    );
    if file.is_some() && document_id.is_none() && extraction.keywords.is_empty() {
        println!(
            "{}",
            "Corpus-relative extraction needs an ingested document; try --document <id>.".dimmed()
        );
    }
    println!();

    if extraction.keywords.is_empty() {
        println!("{}", "No keywords extracted.".yellow());
        return Ok(());
    }

    let names = prepare_names(&extraction.keywords);
    for (i, keyword) in extraction.keywords.iter().enumerate() {
        println!("  {}. {}", i + 1, keyword.cyan().bold());
    }
    println!();
    println!("Tag names: {}", names.join(", ").green());

    Ok(())
}
