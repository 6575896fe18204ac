//! Configuration loading and parsing

use anyhow::{Context, Result};
use callback_registry::RegistryConfig;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub native: NativeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_kinds")]
    pub kinds: Vec<WorkloadKind>,
    #[serde(default = "default_route")]
    pub route: RouteKind,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    #[serde(default = "default_values")]
    pub values: Vec<i32>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            kinds: default_kinds(),
            route: default_route(),
            iterations: default_iterations(),
            depth: default_depth(),
            lanes: default_lanes(),
            values: default_values(),
        }
    }
}

fn default_kinds() -> Vec<WorkloadKind> {
    vec![
        WorkloadKind::Throughput,
        WorkloadKind::Persistent,
        WorkloadKind::Recursive,
        WorkloadKind::PrefixSum,
    ]
}

fn default_route() -> RouteKind {
    RouteKind::Native
}

fn default_iterations() -> u64 {
    100_000
}

fn default_depth() -> u32 {
    200
}

fn default_lanes() -> usize {
    1
}

fn default_values() -> Vec<i32> {
    vec![100, 200, 300, -1000]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadKind {
    /// Wrap an auto-disposed sum callback and invoke it once, repeatedly
    Throughput,
    /// Invoke one persistent callback repeatedly, then dispose it
    Persistent,
    /// Nested managed -> native -> managed chains
    Recursive,
    /// In-place prefix sum over the configured values
    PrefixSum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Call the registry from Rust
    Direct,
    /// Go through native code (bundled module, or [native] library if set)
    Native,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NativeConfig {
    /// Shared library exporting a `cbr_invoke` entry point
    pub library: Option<PathBuf>,
}

/// Load configuration from a TOML file
///
/// Only parsing happens here; call [`validate`] once command-line overrides
/// have been applied.
pub fn load_config(path: &Path) -> Result<BenchConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: BenchConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Reject settings no workload can run with
pub fn validate(config: &BenchConfig) -> Result<()> {
    let workload = &config.workload;
    if workload.kinds.is_empty() {
        anyhow::bail!("workload.kinds must name at least one workload");
    }
    if workload.lanes == 0 {
        anyhow::bail!("workload.lanes must be at least 1");
    }
    if workload.kinds.contains(&WorkloadKind::PrefixSum) && workload.values.is_empty() {
        anyhow::bail!("workload.values must not be empty for the prefix-sum workload");
    }
    // The library is only loaded when calls go through native code
    if workload.route == RouteKind::Native {
        if let Some(library) = &config.native.library {
            if !library.exists() {
                anyhow::bail!("native library not found: {:?}", library);
            }
        }
    }
    Ok(())
}
