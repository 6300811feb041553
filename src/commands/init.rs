//! Data directory initialization

use anyhow::Result;
use colored::*;

use searchive::core::config::{
    Config, CONFIG_FILE, ENV_BUSY_TIMEOUT, ENV_EMBEDDING_DIM, ENV_EMBEDDING_MODEL,
    ENV_EXTRACTION_COUNT, ENV_EXTRACTION_THRESHOLD, ENV_SIMILARITY_THRESHOLD, ENV_STRICT_DEDUP,
};
use searchive::core::paths::get_data_root;
use std::path::Path;

pub fn run(data_dir: Option<&Path>, force: bool) -> Result<()> {
    let root = get_data_root(data_dir);
    let config_path = root.join(CONFIG_FILE);

    println!("{}", "Searchive Initialization".bold());
    println!("{}", "=".repeat(50));
    println!();

    if config_path.exists() && !force {
        println!(
            "{} Config already exists: {} (use --force to reset)",
            "→".blue(),
            config_path.display()
        );
        return Ok(());
    }

    Config::default().save(&root)?;
    println!("{} Wrote {}", "✓".green(), config_path.display());
    println!();
    println!("{}", Config::default_json().dimmed());
    println!();
    println!("Environment overrides:");
    for key in [
        ENV_EXTRACTION_THRESHOLD,
        ENV_EXTRACTION_COUNT,
        ENV_SIMILARITY_THRESHOLD,
        ENV_STRICT_DEDUP,
        ENV_EMBEDDING_MODEL,
        ENV_EMBEDDING_DIM,
        ENV_BUSY_TIMEOUT,
    ] {
        println!("  {}", key.yellow());
    }

    Ok(())
}
