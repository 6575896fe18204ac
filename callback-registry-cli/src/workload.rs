//! Workload drivers
//!
//! Each workload runs on one or more lanes against a single shared registry.
//! Lanes run on a dedicated rayon pool so concurrent `wrap`/`call`/`dispose`
//! traffic hits the same table.

use crate::callbacks::{self, Route};
use crate::config::{WorkloadConfig, WorkloadKind};
use anyhow::{Context, Result};
use callback_registry::{CallbackRegistry, RegistryError};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Stack size of lane threads; recursive chains stack Rust and C frames
const LANE_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Outcome of one workload
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadResult {
    pub kind: WorkloadKind,
    pub route: String,
    pub lanes: usize,
    /// Registry invocations performed, nested ones included
    pub calls: u64,
    pub elapsed_ms: f64,
    pub calls_per_sec: f64,
    /// Sum of all callback results, to compare runs
    pub checksum: i64,
}

/// Per-lane tally
#[derive(Debug, Default, Clone, Copy)]
struct LaneTally {
    calls: u64,
    checksum: i64,
}

impl LaneTally {
    fn merge(self, other: LaneTally) -> LaneTally {
        LaneTally {
            calls: self.calls + other.calls,
            checksum: self.checksum.wrapping_add(other.checksum),
        }
    }
}

/// Runs workloads against one registry
pub struct WorkloadRunner<'r> {
    registry: &'r CallbackRegistry,
    route: Route,
    settings: WorkloadConfig,
    pool: rayon::ThreadPool,
}

impl<'r> WorkloadRunner<'r> {
    pub fn new(registry: &'r CallbackRegistry, route: Route, settings: WorkloadConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.lanes.max(1))
            .stack_size(LANE_STACK_SIZE)
            .thread_name(|index| format!("bench-lane-{}", index))
            .build()
            .context("Failed to build lane thread pool")?;

        Ok(Self {
            registry,
            route,
            settings,
            pool,
        })
    }

    /// Run every configured workload in order
    pub fn run_all(&self) -> Result<Vec<WorkloadResult>> {
        self.settings
            .kinds
            .iter()
            .map(|&kind| self.run(kind))
            .collect()
    }

    /// Run one workload on all lanes
    pub fn run(&self, kind: WorkloadKind) -> Result<WorkloadResult> {
        log::info!(
            "Running {:?} workload via {} ({} lane(s), {} iteration(s) each)",
            kind,
            self.route,
            self.settings.lanes,
            self.settings.iterations
        );

        let start = Instant::now();
        let tally = self
            .pool
            .install(|| {
                (0..self.settings.lanes)
                    .into_par_iter()
                    .map(|lane| self.run_lane(kind, lane))
                    .try_reduce(LaneTally::default, |a, b| Ok(a.merge(b)))
            })
            .with_context(|| format!("{:?} workload failed", kind))?;
        let elapsed = start.elapsed();

        let elapsed_secs = elapsed.as_secs_f64();
        let calls_per_sec = if elapsed_secs > 0.0 {
            tally.calls as f64 / elapsed_secs
        } else {
            0.0
        };

        log::info!(
            "{:?}: {} call(s) in {:.2?} ({:.0} calls/sec)",
            kind,
            tally.calls,
            elapsed,
            calls_per_sec
        );

        Ok(WorkloadResult {
            kind,
            route: self.route.to_string(),
            lanes: self.settings.lanes,
            calls: tally.calls,
            elapsed_ms: elapsed_secs * 1000.0,
            calls_per_sec,
            checksum: tally.checksum,
        })
    }

    fn run_lane(&self, kind: WorkloadKind, lane: usize) -> std::result::Result<LaneTally, RegistryError> {
        log::debug!("Lane {} starting {:?}", lane, kind);
        match kind {
            WorkloadKind::Throughput => self.throughput(lane),
            WorkloadKind::Persistent => self.persistent(),
            WorkloadKind::Recursive => self.recursive(),
            WorkloadKind::PrefixSum => self.prefix_sum(),
        }
    }

    /// Wrap an auto-disposed callback and invoke it once, `iterations` times
    fn throughput(&self, lane: usize) -> std::result::Result<LaneTally, RegistryError> {
        let mut tally = LaneTally::default();
        let lane = lane as i32;

        for i in 0..self.settings.iterations {
            let value = (i % i32::MAX as u64) as i32;
            let handle = self.registry.wrap_once(callbacks::sum)?;
            let mut bytes = callback_registry::pack_i32s(&[lane, value]);
            let result = self.route.invoke(self.registry, handle, &mut bytes)?;

            let expected = lane.wrapping_add(value);
            if result != expected {
                return Err(RegistryError::CallbackFailed(format!(
                    "sum of [{}, {}] returned {}",
                    lane, value, result
                )));
            }
            tally.calls += 1;
            tally.checksum = tally.checksum.wrapping_add(result as i64);
        }
        Ok(tally)
    }

    /// Invoke one persistent callback `iterations` times, then dispose it
    fn persistent(&self) -> std::result::Result<LaneTally, RegistryError> {
        let calls = Arc::new(AtomicU64::new(0));
        let handle = self
            .registry
            .wrap_persistent(callbacks::counter(Arc::clone(&calls)))?;

        let mut tally = LaneTally::default();
        for _ in 0..self.settings.iterations {
            let result = self.route.invoke(self.registry, handle, &mut [])?;
            tally.calls += 1;
            tally.checksum = tally.checksum.wrapping_add(result as i64);
        }
        self.registry.dispose(handle);

        let observed = calls.load(Ordering::Relaxed);
        if observed != self.settings.iterations {
            return Err(RegistryError::CallbackFailed(format!(
                "persistent callback ran {} time(s), expected {}",
                observed, self.settings.iterations
            )));
        }
        Ok(tally)
    }

    /// Run chains of `depth` nested invocations until `iterations` calls are spent
    fn recursive(&self) -> std::result::Result<LaneTally, RegistryError> {
        let depth = self.settings.depth;
        let per_chain = depth as u64 + 1;
        // At least one full chain once any iterations are requested
        let rounds = match self.settings.iterations {
            0 => 0,
            iterations => (iterations / per_chain).max(1),
        };

        let mut tally = LaneTally::default();
        for _ in 0..rounds {
            let levels = callbacks::run_chain(self.registry, &self.route, depth)?;
            if levels as u64 != depth as u64 {
                return Err(RegistryError::CallbackFailed(format!(
                    "chain of depth {} unwound {} level(s)",
                    depth, levels
                )));
            }
            tally.calls += per_chain;
            tally.checksum = tally.checksum.wrapping_add(levels as i64);
        }
        Ok(tally)
    }

    /// In-place prefix sum of the configured values, checked against Rust
    fn prefix_sum(&self) -> std::result::Result<LaneTally, RegistryError> {
        let input = &self.settings.values;
        let expected: Vec<i32> = input
            .iter()
            .scan(0i32, |acc, &value| {
                *acc = acc.wrapping_add(value);
                Some(*acc)
            })
            .collect();

        let mut tally = LaneTally::default();
        for _ in 0..self.settings.iterations {
            let handle = self.registry.wrap_once(callbacks::prefix_sum)?;
            let mut values = input.clone();
            let result = self.route.prefix_sum(self.registry, handle, &mut values)?;

            if values != expected {
                return Err(RegistryError::CallbackFailed(format!(
                    "prefix sum of {:?} produced {:?}",
                    input, values
                )));
            }
            tally.calls += 1;
            tally.checksum = tally.checksum.wrapping_add(result as i64);
        }
        Ok(tally)
    }
}
