//! CLI argument parsing and command dispatch

mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use stream_bench_core::SyntheticAxis;

pub use commands::run;

#[derive(Parser, Debug)]
#[command(name = "stream-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a conversation dataset at one or more request rates
    Throughput(ThroughputArgs),
    /// Send fixed-shape batches while varying one dimension
    Latency(LatencyArgs),
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Server address (host:port)
    #[arg(short, long, env = "STREAM_BENCH_TARGET", default_value = "localhost:50052")]
    pub target: String,

    /// Sampling temperature sent with every request
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    /// Fail requests still in flight after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline_secs: Option<f64>,

    /// Where the JSON report is written
    #[arg(short, long, env = "STREAM_BENCH_OUTPUT")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ThroughputArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// ShareGPT-style dataset
    #[arg(short, long, env = "STREAM_BENCH_DATASET")]
    pub dataset: PathBuf,

    /// tokenizer.json used to measure prompt and answer lengths
    ///
    /// Words are counted when omitted.
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    /// Requests per second; repeat for a sweep. Values <= 0.1 send everything at once
    #[arg(short = 'r', long = "request-rate", value_name = "RATE", value_delimiter = ',')]
    pub request_rates: Vec<f64>,

    /// Use exponentially distributed arrivals with this seed instead of a fixed interval
    #[arg(long)]
    pub poisson_seed: Option<u64>,

    /// Leave failed requests out of latency and token averages
    #[arg(long)]
    pub exclude_failed: bool,
}

/// Dimension varied by the latency sweep
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Requests per batch
    BatchSize,
    /// Prompt tokens per request
    InputLen,
    /// Output tokens per request
    OutputLen,
}

impl Axis {
    /// Values swept when none are given
    pub fn default_values(self) -> Vec<usize> {
        match self {
            Axis::BatchSize => vec![2, 4, 8, 16, 32, 64, 128, 256, 512],
            Axis::InputLen => vec![32, 64, 128, 256, 512, 1024, 2048, 4096, 8192],
            Axis::OutputLen => vec![128, 256, 512, 1024, 2048, 4096, 8192],
        }
    }
}

impl From<Axis> for SyntheticAxis {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::BatchSize => SyntheticAxis::BatchSize,
            Axis::InputLen => SyntheticAxis::InputLen,
            Axis::OutputLen => SyntheticAxis::OutputLen,
        }
    }
}

#[derive(Args, Debug)]
pub struct LatencyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Dimension to sweep
    #[arg(long, value_enum, default_value = "input-len")]
    pub axis: Axis,

    /// Values for the swept dimension (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub values: Vec<usize>,

    /// Requests per batch when not swept
    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    /// Prompt tokens per request when not swept
    #[arg(long, default_value_t = 32)]
    pub input_len: usize,

    /// Output tokens per request when not swept
    #[arg(long, default_value_t = 128)]
    pub output_len: usize,
}
