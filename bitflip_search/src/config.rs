/*!
Configuration management for the bit-flip search.
*/

use anyhow::{bail, Context, Result};
use mimosis::{ChipId, RegisterBlock, RegisterDefaults};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::report::ReportFormat;
use crate::subscriber::BEAM_FEED_PORT;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chip: ChipConfig,
    pub search: SearchConfig,
    pub beam: BeamConfig,
    pub report: ReportConfig,
    pub registers: RegisterOverrides,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            chip: ChipConfig::default(),
            search: SearchConfig::default(),
            beam: BeamConfig::default(),
            report: ReportConfig::default(),
            registers: RegisterOverrides::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<()> {
        ChipId::new(self.chip.chip_id).context("Invalid [chip] section")?;

        if self.search.interval_ms == 0 {
            bail!("search.interval_ms must be positive");
        }
        self.search.block.require_size().context("Invalid search.block")?;
        if !(0.0..=1.0).contains(&self.search.flip_probability) {
            bail!("search.flip_probability must be within 0..=1");
        }

        let defaults = self.register_defaults()?;
        for block in self.search.corrective.iter().chain(&self.search.initialize) {
            if defaults.get(*block).is_none() {
                bail!("no register values available to write {}", block);
            }
        }
        Ok(())
    }

    /// Built-in defaults with the `[registers]` overrides applied
    pub fn register_defaults(&self) -> Result<RegisterDefaults> {
        let mut defaults = RegisterDefaults::standard();
        for (block, bytes) in self.registers.entries() {
            defaults = defaults
                .with_block(block, bytes.to_vec())
                .with_context(|| format!("Invalid [registers] entry for {}", block))?;
        }
        Ok(defaults)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Chip selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChipConfig {
    /// Chip id (1..=7)
    pub chip_id: u8,

    /// Use the simulated device instead of hardware
    pub simulate: bool,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            chip_id: 1,
            simulate: true,
        }
    }
}

/// Detection loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Register block polled by the loop
    pub block: RegisterBlock,

    /// Polling interval in milliseconds
    pub interval_ms: u64,

    /// Blocks re-written after a mismatch; empty stops at the first one
    pub corrective: Vec<RegisterBlock>,

    /// Blocks written with their defaults before the reference read
    pub initialize: Vec<RegisterBlock>,

    /// Inject fake bit flips into reads
    pub sim_read_flip: bool,

    /// Per-read probability of an injected flip
    pub flip_probability: f64,

    /// Seed for injected flips, time based when absent
    pub seed: Option<u64>,

    /// Stop after this many polls
    pub max_iterations: Option<u64>,
}

impl SearchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            block: RegisterBlock::GenConf,
            interval_ms: 100,
            corrective: Vec::new(),
            initialize: vec![RegisterBlock::GenConf, RegisterBlock::Dac],
            sim_read_flip: false,
            flip_probability: mimosis::protocol::DEFAULT_FLIP_PROBABILITY,
            seed: None,
            max_iterations: None,
        }
    }
}

/// Beam position feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// Correlate events with the beam position feed
    pub enabled: bool,

    /// Publisher host
    pub host: String,

    /// Publisher port
    pub port: u16,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: BEAM_FEED_PORT,
        }
    }
}

/// Report output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub format: ReportFormat,
}

/// Optional replacements for the built-in register values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterOverrides {
    pub gen_conf: Option<Vec<u8>>,
    pub dac: Option<Vec<u8>>,
    pub mon: Option<Vec<u8>>,
    pub ro_tst_conf: Option<Vec<u8>>,
    pub mfe: Option<Vec<u8>>,
}

impl RegisterOverrides {
    /// Present overrides paired with their block
    pub fn entries(&self) -> Vec<(RegisterBlock, &[u8])> {
        [
            (RegisterBlock::GenConf, &self.gen_conf),
            (RegisterBlock::Dac, &self.dac),
            (RegisterBlock::Mon, &self.mon),
            (RegisterBlock::RoTstConf, &self.ro_tst_conf),
            (RegisterBlock::Mfe, &self.mfe),
        ]
        .into_iter()
        .filter_map(|(block, bytes)| bytes.as_deref().map(|bytes| (block, bytes)))
        .collect()
    }
}
