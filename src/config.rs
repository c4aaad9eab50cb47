//! Layered application configuration.
//!
//! Load order (lowest to highest precedence): built-in defaults, an optional
//! `config.toml` in the working directory, then environment variables
//! prefixed `BOORU_` with `__` as the nesting separator (e.g.
//! `BOORU_SCANNER__PARALLELISM=4`). `.env` is read first via `dotenvy` so
//! those variables participate in the same pass.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub parallelism: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { parallelism: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub metadata_parallelism: usize,
    pub thumbnail_parallelism: usize,
    pub similarity_parallelism: usize,
    pub run_scheduler: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            metadata_parallelism: 2,
            thumbnail_parallelism: 2,
            similarity_parallelism: 2,
            run_scheduler: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub thumbnail_path: String,
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            thumbnail_path: "./data/thumbnails".to_string(),
            database_url: "sqlite://./data/booru.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    pub base_threshold: f64,
    pub cross_type_threshold: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.68,
            cross_type_threshold: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub processing: ProcessingConfig,
    pub storage: StorageConfig,
    pub similarity: SimilarityConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Loads configuration from defaults, `config.toml` (if present), then
    /// `BOORU_`-prefixed environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = AppConfig::default();

        let builder = config::Config::builder()
            .set_default("scanner.parallelism", defaults.scanner.parallelism as i64)?
            .set_default(
                "processing.metadata_parallelism",
                defaults.processing.metadata_parallelism as i64,
            )?
            .set_default(
                "processing.thumbnail_parallelism",
                defaults.processing.thumbnail_parallelism as i64,
            )?
            .set_default(
                "processing.similarity_parallelism",
                defaults.processing.similarity_parallelism as i64,
            )?
            .set_default("processing.run_scheduler", defaults.processing.run_scheduler)?
            .set_default("storage.thumbnail_path", defaults.storage.thumbnail_path.clone())?
            .set_default("storage.database_url", defaults.storage.database_url.clone())?
            .set_default("similarity.base_threshold", defaults.similarity.base_threshold)?
            .set_default(
                "similarity.cross_type_threshold",
                defaults.similarity.cross_type_threshold,
            )?
            .set_default("server.bind_address", defaults.server.bind_address.clone())?
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("BOORU")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings = builder.build()?;
        let cfg: AppConfig = settings.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates invariants not expressible through defaults alone.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scanner.parallelism < 1 {
            anyhow::bail!("scanner.parallelism must be >= 1");
        }
        if self.processing.metadata_parallelism < 1
            || self.processing.thumbnail_parallelism < 1
            || self.processing.similarity_parallelism < 1
        {
            anyhow::bail!("processing parallelism settings must all be >= 1");
        }
        if !(0.0..=1.0).contains(&self.similarity.base_threshold)
            || !(0.0..=1.0).contains(&self.similarity.cross_type_threshold)
        {
            anyhow::bail!("similarity thresholds must be in [0.0, 1.0]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = AppConfig::default();
        cfg.scanner.parallelism = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut cfg = AppConfig::default();
        cfg.similarity.base_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
