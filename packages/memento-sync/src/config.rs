//! Sync Coordinator configuration (§1.1): defaults → TOML file → environment
//! variables, each layer overriding the previous one. Every knob has a spec
//! default so a bare `SyncConfig::default()` is always a legal configuration.

use crate::error::{SyncError, SyncErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Embedding vector width; the Vector Store rejects anything else at
/// `search`/`upsert` time (§4.7).
pub const ALLOWED_VECTOR_DIMENSIONS: [usize; 4] = [256, 384, 768, 1536];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Per-path debounce window before a file change is dispatched (§4.9).
    pub debounce_ms: u64,
    /// Bounded worker pool size; defaults to the host's logical CPU count.
    pub workers: usize,
    pub embed_batch_size: usize,
    pub embed_rate_per_sec: u32,
    /// Per-file ceiling on `TypeResolver` calls (§4.4 step 4).
    pub type_checker_budget_per_file: u32,
    /// Bound on re-export chain walks in the Cache Manager (§4.2).
    pub re_export_max_depth: u32,
    /// Max evidence entries retained per relationship (§4.6).
    pub evidence_retention: usize,
    pub history_retention_days: i64,
    /// BFS hop bound when materializing a checkpoint (§4.8).
    pub checkpoint_hops: u32,
    pub ignore_globs: Vec<String>,
    /// Whether Directory entities are materialized for unsupported-extension
    /// files (§4.1).
    pub materialize_directories: bool,
    pub vector_dimension: usize,
    pub database_path: PathBuf,
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            workers: num_cpus::get(),
            embed_batch_size: 50,
            embed_rate_per_sec: 20,
            type_checker_budget_per_file: 200,
            re_export_max_depth: 5,
            evidence_retention: 20,
            history_retention_days: 30,
            checkpoint_hops: 2,
            ignore_globs: default_ignore_globs(),
            materialize_directories: true,
            vector_dimension: 768,
            database_path: PathBuf::from("repo.memento.db"),
            log_level: "info".to_string(),
        }
    }
}

fn default_ignore_globs() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/dist/**".to_string(),
    ]
}

impl SyncConfig {
    /// Loads defaults, overlays an optional TOML file, then overlays
    /// `MEMENTO_*` environment variables (§1.1's layering order, last write
    /// wins).
    pub fn load(toml_path: Option<&Path>) -> Result<Self, SyncError> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)?;
                config = toml::from_str(&contents)
                    .map_err(|e| SyncError::new(SyncErrorKind::InvariantViolation, format!("invalid config at {}: {e}", path.display())))?;
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MEMENTO_DEBOUNCE_MS") {
            if let Ok(n) = v.parse() {
                self.debounce_ms = n;
            }
        }
        if let Ok(v) = std::env::var("MEMENTO_WORKERS") {
            if let Ok(n) = v.parse() {
                self.workers = n;
            }
        }
        if let Ok(v) = std::env::var("MEMENTO_EMBED_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.embed_batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("MEMENTO_EMBED_RATE_PER_SEC") {
            if let Ok(n) = v.parse() {
                self.embed_rate_per_sec = n;
            }
        }
        if let Ok(v) = std::env::var("MEMENTO_VECTOR_DIMENSION") {
            if let Ok(n) = v.parse() {
                self.vector_dimension = n;
            }
        }
        if let Ok(v) = std::env::var("MEMENTO_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MEMENTO_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("MEMENTO_MATERIALIZE_DIRECTORIES") {
            if let Ok(b) = v.parse() {
                self.materialize_directories = b;
            }
        }
    }

    fn validate(&self) -> Result<(), SyncError> {
        if !ALLOWED_VECTOR_DIMENSIONS.contains(&self.vector_dimension) {
            return Err(SyncError::new(
                SyncErrorKind::InvariantViolation,
                format!("vector_dimension must be one of {:?}, got {}", ALLOWED_VECTOR_DIMENSIONS, self.vector_dimension),
            ));
        }
        if self.workers == 0 {
            return Err(SyncError::new(SyncErrorKind::InvariantViolation, "workers must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_vector_dimension_rejected() {
        let mut config = SyncConfig::default();
        config.vector_dimension = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_overlay_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memento.toml");
        std::fs::write(&path, "debounce_ms = 1000\nworkers = 4\n").unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.debounce_ms, 1000);
        assert_eq!(config.workers, 4);
        // untouched fields keep their default
        assert_eq!(config.embed_batch_size, 50);
    }

    #[test]
    fn test_missing_toml_file_falls_back_to_defaults() {
        let config = SyncConfig::load(Some(Path::new("/nonexistent/memento.toml"))).unwrap();
        assert_eq!(config.debounce_ms, 500);
    }
}
