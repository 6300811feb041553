//! Data directory management
//!
//! Handles data root detection and the layout of the stores inside it.

use std::path::{Path, PathBuf};

use super::config::Config;

/// Environment variable for data directory configuration
pub const DATA_DIR_ENV: &str = "SEARCHIVE_DATA_DIR";

/// Fallback data directory, relative to the current directory
pub const DEFAULT_DATA_DIR: &str = ".searchive";

/// Data paths wrapper that combines config and resolved store locations
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    /// Primary store: tags, documents and associations
    pub database: PathBuf,
    /// Vector-searchable mirror of tags
    pub tag_index: PathBuf,
    /// Tantivy directory holding document content
    pub corpus: PathBuf,
    pub config: Config,
}

impl DataPaths {
    /// Create DataPaths from a specific root directory.
    /// Loads config from the root.
    pub fn from_root(root: PathBuf) -> Self {
        let config = Config::load(&root);
        Self::from_root_with_config(root, config)
    }

    /// Create DataPaths with explicit config
    pub fn from_root_with_config(root: PathBuf, config: Config) -> Self {
        Self {
            database: root.join("searchive.db"),
            tag_index: root.join("tag_index.db"),
            corpus: root.join("corpus"),
            root,
            config,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.corpus)
    }
}

/// Resolve the data root.
/// Priority: explicit argument > SEARCHIVE_DATA_DIR env var > ./.searchive
pub fn get_data_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_DATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = DataPaths::from_root_with_config(PathBuf::from("/tmp/archive"), Config::default());
        assert_eq!(paths.database, PathBuf::from("/tmp/archive/searchive.db"));
        assert_eq!(paths.tag_index, PathBuf::from("/tmp/archive/tag_index.db"));
        assert_eq!(paths.corpus, PathBuf::from("/tmp/archive/corpus"));
    }

    #[test]
    fn test_explicit_root_wins() {
        let root = get_data_root(Some(Path::new("/data/searchive")));
        assert_eq!(root, PathBuf::from("/data/searchive"));
    }
}
