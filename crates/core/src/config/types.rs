use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::dedup::DedupConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::pipeline::PipelineConfig;
use crate::placer::PlacerConfig;
use crate::space::SpaceConfig;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub placer: PlacerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub space: SpaceConfig,
}

impl Config {
    /// Configured database path, or `<destination>/conf/archivist.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.path.clone().or_else(|| {
            self.run
                .destination
                .as_ref()
                .map(|d| d.join("conf").join(DEFAULT_DB_FILE))
        })
    }
}

const DEFAULT_DB_FILE: &str = "archivist.db";

/// Roots of the migration; only the binary requires them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

/// Database configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.run.source.is_none());
        assert_eq!(config.orchestrator.workers, 4);
        assert!(config.pipeline.skip_hidden);
        assert!(config.database_path().is_none());
    }

    #[test]
    fn test_deserialize_sections() {
        let toml = r#"
[run]
source = "/media/card"
destination = "/archive"

[orchestrator]
workers = 8

[orchestrator.retry]
max_attempts = 5

[space]
override_preflight = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.orchestrator.workers, 8);
        assert_eq!(config.orchestrator.retry.max_attempts, 5);
        assert_eq!(config.orchestrator.retry.initial_delay_ms, 200); // default
        assert!(config.space.override_preflight);
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/archive/conf/archivist.db"))
        );
    }

    #[test]
    fn test_explicit_database_path_wins() {
        let toml = r#"
[run]
destination = "/archive"

[database]
path = "/data/my-db.sqlite"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/data/my-db.sqlite"))
        );
    }
}
