//! Report generation
//!
//! Renders workload results and final registry counters as plain text or JSON.

use crate::config::OutputFormat;
use crate::workload::WorkloadResult;
use anyhow::{Context, Result};
use callback_registry::RegistryStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub generated_at: String,
    pub version: String,
    pub registry_version: String,
    pub route: String,
    pub workloads: Vec<WorkloadResult>,
    pub registry: RegistryStats,
}

impl BenchReport {
    pub fn new(route: String, workloads: Vec<WorkloadResult>, registry: RegistryStats) -> Self {
        Self::at(Utc::now(), route, workloads, registry)
    }

    fn at(
        generated_at: DateTime<Utc>,
        route: String,
        workloads: Vec<WorkloadResult>,
        registry: RegistryStats,
    ) -> Self {
        Self {
            generated_at: generated_at.to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            registry_version: callback_registry::VERSION.to_string(),
            route,
            workloads,
            registry,
        }
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Txt => Ok(self.render_txt()),
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).context("Failed to serialize report")
            }
        }
    }

    fn render_txt(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(out, "  Callback Registry Benchmark");
        let _ = writeln!(out, "═══════════════════════════════════════════════");
        let _ = writeln!(out, "Generated: {}", self.generated_at);
        let _ = writeln!(out, "Route:     {}", self.route);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<12} {:>6} {:>12} {:>12} {:>14} {:>14}",
            "Workload", "Lanes", "Calls", "Elapsed ms", "Calls/sec", "Checksum"
        );
        let _ = writeln!(out, "{}", "─".repeat(75));
        for result in &self.workloads {
            let kind = serde_json::to_value(result.kind)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", result.kind));
            let _ = writeln!(
                out,
                "{:<12} {:>6} {:>12} {:>12.2} {:>14.0} {:>14}",
                kind,
                result.lanes,
                result.calls,
                result.elapsed_ms,
                result.calls_per_sec,
                result.checksum
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Registry:");
        let _ = writeln!(out, "  Live entries:   {}", self.registry.live_entries);
        let _ = writeln!(out, "  Wrapped:        {}", self.registry.wrapped);
        let _ = writeln!(out, "  Invocations:    {}", self.registry.invocations);
        let _ = writeln!(out, "  Auto-disposed:  {}", self.registry.auto_disposed);
        let _ = writeln!(out, "  Disposed:       {}", self.registry.disposed);
        let _ = writeln!(out, "  Failed lookups: {}", self.registry.failed_lookups);
        out
    }
}

/// Write the rendered report to `path`, or stdout when no path is given
pub fn write_report(report: &BenchReport, format: OutputFormat, path: Option<&Path>) -> Result<()> {
    let rendered = report.render(format)?;
    match path {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write report: {:?}", path))?;
            log::info!("Report written to {:?}", path);
        }
        None => println!("{}", rendered),
    }
    Ok(())
}
