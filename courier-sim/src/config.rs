use std::{fs, path::Path};

use courier_progress::ControllerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerConfig,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Size of the simulated file in bytes
    pub file_size: u64,
    /// Bytes moved per worker step
    pub chunk_size: u64,
    pub chunk_delay_ms: u64,
    /// Probability that any single step fails the transfer
    pub failure_rate: f64,
    /// Number of generation (transcoding) steps for blended sends
    pub generation_steps: u32,
    pub generation_delay_ms: u64,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            file_size: 4 * 1024 * 1024,
            chunk_size: 128 * 1024,
            chunk_delay_ms: 40,
            failure_rate: 0.0,
            generation_steps: 10,
            generation_delay_ms: 60,
            seed: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
