use anyhow::Result;
use colored::*;

use searchive::DocumentService;

pub async fn run(service: &DocumentService, json: bool) -> Result<()> {
    let status = service.status().await?;

    if json {
        return super::print_json(&status);
    }

    println!("{}", "Searchive Status".bold());
    println!("{}", "=".repeat(50));
    println!();
    println!("Documents:          {}", status.store.documents);
    println!("Corpus documents:   {}", status.corpus_documents);
    println!("Tags:               {}", status.store.tags);
    println!("Indexed tags:       {}", status.indexed_tags);
    println!("Associations:       {}", status.store.associations);
    println!();
    println!("Embedder:           {} ({}d)", status.embedder.cyan(), status.dimension);
    println!(
        "Next extraction:    {} (threshold {})",
        status.next_strategy.to_string().cyan(),
        status.extraction_threshold
    );
    println!("                    {}", status.next_strategy_description.dimmed());

    let mirrorable = status.store.tags - status.store.tags_without_embedding;
    if status.indexed_tags as i64 != mirrorable {
        println!();
        println!(
            "{}",
            "⚠️  Tag index is out of sync. Run `searchive tags reconcile`.".yellow()
        );
    }

    println!();
    println!("{}", "=".repeat(50));
    Ok(())
}
