// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod output;
mod size_limited_writer;
mod suites;

use anyhow::Context;
use avrlit_config::{RunConfig, TargetKind};
use avrlit_core::protocol::fingerprint_hex;
use avrlit_core::report::{EXIT_CONFIG_ERROR, EXIT_PASS, EXIT_RUNTIME_ERROR};
use avrlit_core::{Harness, HarnessOptions, Reporter, SimTarget, Stub, TcpLink, TestCase};
use clap::{Parser, Subcommand};
use output::{RunResult, TargetReport, RESULT_SCHEMA_VERSION};
use size_limited_writer::SizeLimitedWriter;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use suites::TargetModel;
use tracing::{error, info, warn};

const MAX_CASE_LOG_BYTES: u64 = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "AvrLit host/target differential test runner",
    long_about = None
)]
struct Cli {
    /// Enable frame-level and stub state tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a built-in suite against a target and compare with the host build.
    Test(TestArgs),

    /// Serve a simulated target stub over TCP.
    Serve(ServeArgs),

    /// List built-in suites.
    List,
}

#[derive(Parser, Debug)]
struct TestArgs {
    /// Suite to run (see `avrlit list`)
    #[arg(long)]
    suite: String,

    /// Path to the run config (YAML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Target: `sim` or `tcp://host:port` (overrides the config)
    #[arg(long)]
    target: Option<String>,

    /// Simulated target model: native, avr-int16 (overrides the config)
    #[arg(long)]
    model: Option<String>,

    /// Directory to write test artifacts (result.json, junit.xml, cases.log)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Optional path to write a JUnit XML report for CI systems
    #[arg(long)]
    junit: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7878")]
    listen: String,

    /// Target model to serve
    #[arg(long, default_value = "native")]
    model: String,

    /// Exit after the first host disconnects
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Test(args) => run_test(args),
        Commands::Serve(args) => run_serve(args),
        Commands::List => run_list(),
    }
}

fn run_list() -> ExitCode {
    for (name, description) in suites::SUITES {
        println!("{:<20} {}", name, description);
    }
    ExitCode::from(EXIT_PASS)
}

/// Applies `--target` and `--model` on top of the loaded config.
fn resolve_config(args: &TestArgs) -> anyhow::Result<(RunConfig, TargetModel)> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };

    if let Some(target) = &args.target {
        if target == "sim" {
            config.target.kind = TargetKind::Sim;
            config.target.address = None;
        } else if let Some(addr) = target.strip_prefix("tcp://") {
            config.target.kind = TargetKind::Tcp;
            config.target.address = Some(addr.to_string());
        } else {
            anyhow::bail!(
                "Unsupported target '{}'. Expected 'sim' or 'tcp://host:port'",
                target
            );
        }
    }
    if let Some(model) = &args.model {
        config.target.model = model.clone();
    }
    config.validate()?;

    let model = config
        .target
        .model
        .parse::<TargetModel>()
        .map_err(anyhow::Error::msg)?;
    Ok((config, model))
}

fn target_report(config: &RunConfig, model: TargetModel) -> TargetReport {
    TargetReport {
        kind: match config.target.kind {
            TargetKind::Sim => "sim".to_string(),
            TargetKind::Tcp => "tcp".to_string(),
        },
        address: config.target.address.clone(),
        model: model.as_str().to_string(),
        name: None,
        fingerprint: None,
    }
}

fn case_log(args: &TestArgs) -> Reporter {
    let Some(dir) = &args.output_dir else {
        return Reporter::new();
    };
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Failed to create output directory {:?}: {}", dir, e);
        return Reporter::new();
    }
    let path = dir.join("cases.log");
    match std::fs::File::create(&path) {
        Ok(f) => Reporter::with_sink(Box::new(SizeLimitedWriter::new(f, MAX_CASE_LOG_BYTES))),
        Err(e) => {
            warn!("Failed to create {:?}: {}", path, e);
            Reporter::new()
        }
    }
}

fn connect(
    config: &RunConfig,
    model: TargetModel,
    options: HarnessOptions,
    reporter: Reporter,
) -> anyhow::Result<(Harness, Option<SimTarget>)> {
    match config.target.kind {
        TargetKind::Sim => {
            let stub = Stub::new(model.table(), model.descriptor());
            let (target, link) = SimTarget::spawn(stub);
            let harness = Harness::connect_with_reporter(link, options, reporter)
                .context("Handshake with simulated target failed")?;
            Ok((harness, Some(target)))
        }
        TargetKind::Tcp => {
            let addr = config.target.address.as_deref().unwrap_or_default();
            let link = TcpLink::connect(addr)
                .with_context(|| format!("Failed to connect to target at {}", addr))?;
            let harness = Harness::connect_with_reporter(link, options, reporter)
                .with_context(|| format!("Handshake with target at {} failed", addr))?;
            Ok((harness, None))
        }
    }
}

/// Artifacts for a run that ended before any case was resolved.
fn write_error_outputs(
    args: &TestArgs,
    started: Instant,
    message: String,
    target: TargetReport,
) {
    error!("{}", message);
    let result = RunResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: "error".to_string(),
        suite: args.suite.clone(),
        target,
        summary: Default::default(),
        message: Some(message),
        duration_ms: started.elapsed().as_millis() as u64,
        cases: Vec::new(),
        config: args.config.clone(),
    };
    output::write_outputs(
        args.output_dir.as_deref(),
        args.junit.as_deref(),
        &result,
        started.elapsed(),
    );
}

fn run_test(args: TestArgs) -> ExitCode {
    let started = Instant::now();

    let (config, model) = match resolve_config(&args) {
        Ok(v) => v,
        Err(e) => {
            write_error_outputs(
                &args,
                started,
                format!("{:#}", e),
                TargetReport {
                    kind: args.target.clone().unwrap_or_else(|| "sim".to_string()),
                    address: None,
                    model: args.model.clone().unwrap_or_else(|| "native".to_string()),
                    name: None,
                    fingerprint: None,
                },
            );
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let mut target = target_report(&config, model);

    let Some(suite) = suites::suite_by_name(&args.suite) else {
        let names: Vec<&str> = suites::SUITES.iter().map(|(n, _)| *n).collect();
        write_error_outputs(
            &args,
            started,
            format!(
                "Unknown suite '{}'. Available: {}",
                args.suite,
                names.join(", ")
            ),
            target,
        );
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };

    let options = match HarnessOptions::from_config(&config) {
        Ok(o) => o,
        Err(e) => {
            write_error_outputs(&args, started, format!("{:#}", e), target);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    info!(
        "Running suite {} against {} target (model {})",
        args.suite,
        target.kind,
        model.as_str()
    );

    let (mut harness, sim) = match connect(&config, model, options, case_log(&args)) {
        Ok(v) => v,
        Err(e) => {
            write_error_outputs(&args, started, format!("{:#}", e), target);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    target.name = Some(harness.target_info().name.clone());
    target.fingerprint = Some(fingerprint_hex(&harness.target_info().fingerprint));

    if let Err(e) = harness.check_fingerprint(&suites::catalog()) {
        write_error_outputs(
            &args,
            started,
            format!("Target image does not match host build: {}", e),
            target,
        );
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }

    let summary = harness.run_test(suite.as_ref());
    info!("{}", summary);

    let mut reporter = harness.into_reporter();
    reporter.flush();

    if let Some(sim) = sim {
        let snapshot = sim.join();
        if snapshot.crashes > 0 {
            warn!(
                "Simulated target crashed {} time(s); {} resets",
                snapshot.crashes, snapshot.status.reset_count
            );
        }
    }

    let duration = started.elapsed();
    let result = RunResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: summary.status().to_string(),
        suite: suite.name().to_string(),
        target,
        summary: summary.clone(),
        message: None,
        duration_ms: duration.as_millis() as u64,
        cases: reporter.records().to_vec(),
        config: args.config.clone(),
    };
    output::write_outputs(
        args.output_dir.as_deref(),
        args.junit.as_deref(),
        &result,
        duration,
    );

    ExitCode::from(summary.exit_code())
}

fn run_serve(args: ServeArgs) -> ExitCode {
    let model = match args.model.parse::<TargetModel>() {
        Ok(m) => m,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let listener = match TcpListener::bind(&args.listen) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to listen on {}: {}", args.listen, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!("Serving {} target on {}", model.as_str(), addr),
        Err(_) => info!("Serving {} target on {}", model.as_str(), args.listen),
    }

    // One host at a time, like a single UART.
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        let link = match TcpLink::from_stream(stream) {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to set up connection: {}", e);
                continue;
            }
        };
        if let Some(peer) = link.peer_addr() {
            info!("Host connected from {}", peer);
        }

        let target = SimTarget::spawn_on(Stub::new(model.table(), model.descriptor()), link);
        let snapshot = target.join();
        info!(
            "Host disconnected after {} requests ({} crashes)",
            snapshot.requests_served, snapshot.crashes
        );

        if args.once {
            break;
        }
    }

    ExitCode::from(EXIT_PASS)
}
