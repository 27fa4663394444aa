//! Command execution

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use stream_bench_core::{
    run_sweep, ArrivalPolicy, BenchmarkDriver, FailedRequestPolicy, RequestCatalog, RunConfig,
    SweepEntry, SweepPoint, TokenCounter, Transport,
};
use stream_bench_report::JsonReportWriter;
use stream_bench_samplers::{HfTokenizer, ShareGptSource, SyntheticSource, WhitespaceTokenizer};
use stream_bench_transport::{GrpcConfig, GrpcTransport};

use super::{Commands, LatencyArgs, TargetArgs, ThroughputArgs};

/// Execute a parsed command
pub async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Throughput(args) => throughput(args).await,
        Commands::Latency(args) => latency(args).await,
    }
}

async fn throughput(args: ThroughputArgs) -> Result<()> {
    let tokenizer: Arc<dyn TokenCounter> = match &args.tokenizer {
        Some(path) => Arc::new(HfTokenizer::from_file(path)?),
        None => {
            tracing::warn!("No tokenizer given; token lengths are word counts");
            Arc::new(WhitespaceTokenizer)
        }
    };
    let source = ShareGptSource::new(&args.dataset, tokenizer);
    let catalog = RequestCatalog::load(&source)
        .with_context(|| format!("failed to load dataset {}", args.dataset.display()))?;

    let entries = throughput_entries(&args, &catalog);

    let failed_requests = if args.exclude_failed {
        FailedRequestPolicy::Exclude
    } else {
        FailedRequestPolicy::Include
    };
    let config = run_config(&args.target)?.with_failed_requests(failed_requests);

    sweep(&args.target, config, entries).await
}

async fn latency(args: LatencyArgs) -> Result<()> {
    let entries = latency_entries(&args)?;
    let config = run_config(&args.target)?;

    sweep(&args.target, config, entries).await
}

/// One entry per requested rate; no rate means a single unpaced run
fn throughput_entries(args: &ThroughputArgs, catalog: &RequestCatalog) -> Vec<SweepEntry> {
    let rates = if args.request_rates.is_empty() {
        vec![0.0]
    } else {
        args.request_rates.clone()
    };

    rates
        .into_iter()
        .map(|rate| {
            let entry = SweepEntry::new(SweepPoint::RequestRate { rate }, catalog.clone());
            match (args.poisson_seed, entry.policy) {
                (Some(seed), ArrivalPolicy::FixedRate { rate }) => {
                    entry.with_policy(ArrivalPolicy::Poisson { rate, seed })
                }
                _ => entry,
            }
        })
        .collect()
}

/// One synthetic batch per value of the swept axis
fn latency_entries(args: &LatencyArgs) -> Result<Vec<SweepEntry>> {
    let values = if args.values.is_empty() {
        args.axis.default_values()
    } else {
        args.values.clone()
    };

    values
        .into_iter()
        .map(|value| {
            let mut source = SyntheticSource::new(args.batch_size, args.input_len, args.output_len);
            match args.axis {
                super::Axis::BatchSize => source.batch_size = value,
                super::Axis::InputLen => source.input_len = value,
                super::Axis::OutputLen => source.output_len = value,
            }

            let catalog = RequestCatalog::load(&source)
                .with_context(|| format!("invalid synthetic batch {source:?}"))?;
            let point = SweepPoint::Synthetic {
                axis: args.axis.into(),
                batch_size: source.batch_size,
                input_len: source.input_len,
                output_len: source.output_len,
            };
            Ok(SweepEntry::new(point, catalog))
        })
        .collect()
}

fn run_config(target: &TargetArgs) -> Result<RunConfig> {
    let config = match target.deadline_secs {
        Some(secs) => {
            let deadline = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid deadline {secs}"))?;
            RunConfig::default().with_deadline(deadline)
        }
        None => RunConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn sweep(target: &TargetArgs, config: RunConfig, entries: Vec<SweepEntry>) -> Result<()> {
    let grpc = GrpcConfig::default().with_temperature(target.temperature);
    let transport = Arc::new(GrpcTransport::new(&target.target, grpc)?);

    // An unreachable target at startup is fatal; later it only skips a point
    transport
        .ready()
        .await
        .with_context(|| format!("cannot reach {}", target.target))?;

    let driver = BenchmarkDriver::new(transport, config);
    let mut report = JsonReportWriter::new(&target.output);
    let points = entries.len();

    tracing::info!(
        endpoint = %target.target,
        points,
        output = %target.output.display(),
        "Starting sweep"
    );

    let summary = tokio::select! {
        result = run_sweep(&driver, entries, &mut report) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(
                output = %target.output.display(),
                "Interrupted; report holds the points completed so far"
            );
            return Ok(());
        }
    };

    for (point, reason) in &summary.skipped {
        tracing::warn!(point = %point, reason = %reason, "Point was skipped");
    }
    if summary.completed.is_empty() && !summary.skipped.is_empty() {
        bail!("every sweep point failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Axis, Cli};
    use clap::Parser;
    use stream_bench_core::{DatasetRecord, SyntheticAxis};

    fn parse_throughput(extra: &[&str]) -> ThroughputArgs {
        let mut argv = vec!["stream-bench", "throughput", "-d", "data.json", "-o", "out.json"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Throughput(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn parse_latency(extra: &[&str]) -> LatencyArgs {
        let mut argv = vec!["stream-bench", "latency", "-o", "out.json"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Latency(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn catalog() -> RequestCatalog {
        RequestCatalog::from_records(vec![DatasetRecord {
            prompt: "hi".into(),
            prompt_len: 1,
            expected_output_len: 4,
        }])
        .unwrap()
    }

    #[test]
    fn test_no_rate_is_one_unpaced_point() {
        let entries = throughput_entries(&parse_throughput(&[]), &catalog());

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].point, SweepPoint::RequestRate { rate: 0.0 });
        assert_eq!(entries[0].policy, ArrivalPolicy::Unlimited);
    }

    #[test]
    fn test_rate_sweep_policies() {
        let entries = throughput_entries(&parse_throughput(&["-r", "0.05,4"]), &catalog());

        let policies: Vec<_> = entries.iter().map(|e| e.policy).collect();
        assert_eq!(
            policies,
            vec![ArrivalPolicy::Unlimited, ArrivalPolicy::FixedRate { rate: 4.0 }]
        );
    }

    #[test]
    fn test_poisson_seed() {
        let args = parse_throughput(&["-r", "0,4", "--poisson-seed", "7"]);
        let entries = throughput_entries(&args, &catalog());

        assert_eq!(entries[0].policy, ArrivalPolicy::Unlimited);
        assert_eq!(entries[1].policy, ArrivalPolicy::Poisson { rate: 4.0, seed: 7 });
    }

    #[test]
    fn test_latency_entries_vary_one_axis() {
        let args = parse_latency(&["--axis", "output-len", "--values", "256,512"]);

        let entries = latency_entries(&args).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].point,
            SweepPoint::Synthetic {
                axis: SyntheticAxis::OutputLen,
                batch_size: 8,
                input_len: 32,
                output_len: 512,
            }
        );
        assert_eq!(entries[1].catalog.len(), 8);
        assert_eq!(entries[1].catalog.iter().next().unwrap().prompt, "32");
        assert_eq!(entries[1].policy, ArrivalPolicy::Unlimited);
    }

    #[test]
    fn test_latency_default_values() {
        let entries = latency_entries(&parse_latency(&["--axis", "batch-size"])).unwrap();
        assert_eq!(entries.len(), Axis::BatchSize.default_values().len());
        assert_eq!(entries[0].catalog.len(), 2);
    }

    #[test]
    fn test_zero_batch_is_rejected() {
        let args = parse_latency(&["--axis", "batch-size", "--values", "0"]);
        assert!(latency_entries(&args).is_err());
    }

    #[test]
    fn test_run_config_deadline() {
        let args = parse_latency(&["--deadline-secs", "30"]);
        let config = run_config(&args.target).unwrap();
        assert_eq!(config.deadline, Some(Duration::from_secs(30)));

        let args = parse_latency(&["--deadline-secs", "0"]);
        assert!(run_config(&args.target).is_err());
    }
}
