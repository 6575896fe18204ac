//! Callback Registry Benchmark CLI
//!
//! Command-line driver for the callback-registry library. It adds:
//! - Throughput, persistent, recursive and prefix-sum workloads
//! - Routing through Rust, the bundled C module or an external native library
//! - Concurrent lanes against one shared registry
//! - Text/JSON reports

use anyhow::Result;
use callback_registry::CallbackRegistry;
use clap::Parser;
use std::path::PathBuf;

mod callbacks;
mod config;
mod native_lib;
mod report;
mod workload;

use callbacks::Route;
use config::{BenchConfig, OutputFormat, RouteKind, WorkloadKind};
use native_lib::NativeLibrary;
use report::BenchReport;
use workload::WorkloadRunner;

/// Callback Bench - Drive callbacks across the native boundary
#[derive(Parser, Debug)]
#[command(name = "callback-bench")]
#[command(about = "Exercise the callback registry across the Rust/native boundary", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Workload(s) to run (can be repeated; default: all)
    #[arg(short, long, value_enum)]
    workload: Vec<WorkloadKind>,

    /// Call the registry directly or through native code
    #[arg(long, value_enum)]
    route: Option<RouteKind>,

    /// Iterations per lane
    #[arg(short = 'n', long, value_name = "COUNT")]
    iterations: Option<u64>,

    /// Nesting depth of recursive chains
    #[arg(long, value_name = "LEVELS")]
    depth: Option<u32>,

    /// Number of concurrent lanes sharing the registry
    #[arg(long, value_name = "COUNT")]
    lanes: Option<usize>,

    /// Shared library exporting cbr_invoke, used instead of the bundled module
    #[arg(long, value_name = "FILE")]
    native_lib: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Output file for the report (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Trace every registry invocation (very noisy, use with -vv)
    #[arg(long)]
    trace_calls: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Callback Bench v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using callback-registry v{}", callback_registry::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => BenchConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config::validate(&config)?;
    log::debug!("Effective configuration: {:?}", config);

    let route = select_route(&config)?;

    let registry = CallbackRegistry::with_config(config.registry.clone());
    log::debug!("Registry configuration: {:?}", registry.config());
    let runner = WorkloadRunner::new(&registry, route.clone(), config.workload.clone())?;
    let results = runner.run_all()?;

    let report = BenchReport::new(route.to_string(), results, registry.stats());
    report::write_report(&report, config.output.format, config.output.path.as_deref())?;

    Ok(())
}

/// Pick how handles get invoked; an external library is only loaded when
/// calls go through native code
fn select_route(config: &BenchConfig) -> Result<Route> {
    match (config.workload.route, &config.native.library) {
        (RouteKind::Direct, _) => Ok(Route::Direct),
        (RouteKind::Native, Some(path)) => {
            let library = NativeLibrary::load(path)?;
            log::info!("Routing through external library {:?}", library.path());
            Ok(library.route())
        }
        (RouteKind::Native, None) => Ok(Route::Bundled),
    }
}

/// Command-line flags win over the configuration file
fn apply_overrides(config: &mut BenchConfig, args: &Args) {
    if !args.workload.is_empty() {
        config.workload.kinds = args.workload.clone();
    }
    if let Some(route) = args.route {
        config.workload.route = route;
    }
    if let Some(iterations) = args.iterations {
        config.workload.iterations = iterations;
    }
    if let Some(depth) = args.depth {
        config.workload.depth = depth;
    }
    if let Some(lanes) = args.lanes {
        config.workload.lanes = lanes;
    }
    if let Some(library) = &args.native_lib {
        config.native.library = Some(library.clone());
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
    if let Some(output) = &args.output {
        config.output.path = Some(output.clone());
    }
    if args.trace_calls {
        config.registry.trace_calls = true;
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
