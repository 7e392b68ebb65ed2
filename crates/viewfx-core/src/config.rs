use serde::{Deserialize, Serialize};

use crate::error::{ViewFxError, ViewFxResult};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Worker threads for banded rendering; None uses the global rayon pool.
    pub threads: Option<usize>,
    /// Bands per render window; None means one per worker.
    pub bands: Option<usize>,
    pub gpu: bool,
    pub cpu_driver: String, // "reference" | "threaded" | "fallback"
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            threads: None,
            bands: None,
            gpu: true,
            cpu_driver: "threaded".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ViewFxConfig {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ViewFxConfig {
    pub fn from_toml_str(contents: &str) -> ViewFxResult<Self> {
        toml::from_str(contents).map_err(|e| ViewFxError::Config(e.to_string()))
    }

    pub fn load_from_file(path: &std::path::Path) -> ViewFxResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> ViewFxResult<String> {
        toml::to_string_pretty(self).map_err(|e| ViewFxError::Config(e.to_string()))
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> ViewFxResult<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}
