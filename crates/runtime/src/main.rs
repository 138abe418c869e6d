#![deny(clippy::all, clippy::pedantic)]

//! # Dispatch harness
//!
//! Runs one builtin kernel over one dispatch on the CPU backend and prints the
//! resulting output buffer on stdout. Logs go to stderr and are filtered with
//! `RUST_LOG`.
//!
//! ```text
//! runtime_main --kernel global-constant --workgroup-count 2 1 1 --output-length 24
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use compute::{
    BuiltinKernel, ComputeBackend, ComputeError, CpuBackend, Dispatch, DispatchOutput,
    ExecutionMode, RaceReport,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "runtime_main", about = "Run a builtin compute kernel over a dispatch grid")]
struct Args {
    /// Kernel to run: local-index, global-constant or local-invocation-index.
    #[arg(long, default_value = "local-index")]
    kernel: BuiltinKernel,

    /// Number of workgroups along x, y and z.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [1, 1, 1])]
    workgroup_count: Vec<u32>,

    /// Invocations per workgroup along x, y and z.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [12, 1, 1])]
    workgroup_size: Vec<u32>,

    /// Length of the u32 output buffer.
    #[arg(long, default_value_t = 12)]
    output_length: usize,

    /// Execution mode. Defaults to $COMPUTE_EXECUTION_MODE, then sequential.
    #[arg(long)]
    mode: Option<ExecutionMode>,

    /// Exit with an error if any output index had more than one writer.
    #[arg(long)]
    fail_on_race: bool,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// The buffer as `[a, b, ...]`.
    Text,
    /// A JSON report including race diagnostics.
    Json,
}

#[derive(Serialize)]
struct Report<'a> {
    kernel: String,
    mode: String,
    workgroup_count: [u32; 3],
    workgroup_size: [u32; 3],
    invocations: u64,
    writes: u64,
    buffer: &'a [u32],
    races: Vec<RaceEntry>,
}

#[derive(Serialize)]
struct RaceEntry {
    index: usize,
    contenders: Vec<Contender>,
}

#[derive(Serialize)]
struct Contender {
    workgroup_id: [u32; 3],
    local_invocation_id: [u32; 3],
}

impl From<&RaceReport> for RaceEntry {
    fn from(race: &RaceReport) -> Self {
        Self {
            index: race.index,
            contenders: race
                .contenders
                .iter()
                .map(|id| Contender {
                    workgroup_id: id.workgroup_id,
                    local_invocation_id: id.local_invocation_id,
                })
                .collect(),
        }
    }
}

fn dim3(values: &[u32], flag: &str) -> Result<[u32; 3]> {
    <[u32; 3]>::try_from(values).with_context(|| format!("--{flag} takes exactly three values"))
}

fn print_output(
    args: &Args,
    mode: ExecutionMode,
    dispatch: &Dispatch,
    output: &DispatchOutput,
) -> Result<()> {
    match args.format {
        Format::Text => {
            println!("{:?}", output.buffer.as_slice());
            for race in &output.races {
                let writers: Vec<String> = race.contenders.iter().map(ToString::to_string).collect();
                eprintln!("race on index {}: {}", race.index, writers.join("; "));
            }
        }
        Format::Json => {
            let report = Report {
                kernel: args.kernel.to_string(),
                mode: format!("{mode:?}").to_lowercase(),
                workgroup_count: dispatch.workgroup_count,
                workgroup_size: dispatch.workgroup_size,
                invocations: output.invocations,
                writes: output.writes,
                buffer: output.buffer.as_slice(),
                races: output.races.iter().map(RaceEntry::from).collect(),
            };
            println!("{}", serde_json::to_string(&report)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let dispatch = Dispatch::new(
        dim3(&args.workgroup_count, "workgroup-count")?,
        dim3(&args.workgroup_size, "workgroup-size")?,
    );
    let mode = args.mode.unwrap_or_else(ExecutionMode::from_env);
    let backend = CpuBackend::with_mode(mode);

    tracing::info!(kernel = %args.kernel, ?dispatch, ?mode, "Dispatching");
    let output = match backend.dispatch(&args.kernel, &dispatch, args.output_length) {
        Ok(output) => output,
        Err(err) => {
            if let ComputeError::OutOfBoundsWrite { partial, .. } = &err {
                tracing::error!("Partial output before abort: {:?}", partial.as_slice());
            }
            return Err(err).context("dispatch failed");
        }
    };
    tracing::info!(invocations = output.invocations, writes = output.writes, "Dispatch completed");

    print_output(&args, mode, &dispatch, &output)?;

    if args.fail_on_race {
        output.check_races()?;
    }
    Ok(())
}
