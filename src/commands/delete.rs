use anyhow::{Context, Result};
use colored::*;

use searchive::tags::database::DocumentId;
use searchive::DocumentService;

pub async fn run(service: &DocumentService, id: i64, json: bool) -> Result<()> {
    let document = service
        .delete_document(DocumentId(id))
        .await
        .with_context(|| format!("Failed to delete document {}", id))?;

    if json {
        super::print_json(&document)?;
    } else {
        println!(
            "{} Deleted {} [{}]",
            "✓".green(),
            document.filename.bold(),
            document.id
        );
    }
    Ok(())
}
