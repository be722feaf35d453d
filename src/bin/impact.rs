// Hazard impact run
//
// Usage: impact <config.yaml> [--ranks N]
//
// With --ranks N the run is split across N cooperating ranks (threads
// joined by channels); rank 0 loads, gathers and writes.

use anyhow::{bail, Context as _, Result};
use hazard_impact::{ChannelTransport, Context, JobRegistry, Pipeline, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    config: PathBuf,
    ranks: usize,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut ranks = 1;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ranks" => {
                let value = args.next().context("--ranks needs a value")?;
                ranks = value
                    .parse()
                    .with_context(|| format!("--ranks must be a positive integer, got '{}'", value))?;
                if ranks == 0 {
                    bail!("--ranks must be at least 1");
                }
            }
            "-h" | "--help" => {
                println!("Usage: impact <config.yaml> [--ranks N]");
                std::process::exit(0);
            }
            other if config.is_none() => config = Some(PathBuf::from(other)),
            other => bail!("Unexpected argument '{}'", other),
        }
    }

    let config = config.context("Usage: impact <config.yaml> [--ranks N]")?;
    Ok(Args { config, ranks })
}

fn run_distributed(pipeline: Arc<Pipeline>, ranks: usize) -> Result<()> {
    let handles: Vec<_> = ChannelTransport::mesh(ranks)
        .into_iter()
        .map(|transport| {
            let pipeline = Arc::clone(&pipeline);
            std::thread::spawn(move || -> Result<()> {
                let span = tracing::info_span!("rank", rank = transport.rank());
                let _guard = span.enter();
                let mut ctx = Context::with_transport(Arc::new(transport));
                pipeline.run(&mut ctx)
            })
        })
        .collect();

    let mut first_error = None;
    for (rank, handle) in handles.into_iter().enumerate() {
        let result = match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("Rank {} panicked", rank)),
        };
        if let Err(e) = result {
            tracing::error!("Rank {} failed: {:#}", rank, e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    let registry = JobRegistry::builtin()?;
    let pipeline = Pipeline::from_config(&args.config, &registry)?;

    tracing::info!("{} jobs from {:?} on {} rank(s)", pipeline.len(), args.config, args.ranks);

    if args.ranks == 1 {
        let mut ctx = Context::new();
        pipeline.run(&mut ctx)?;
    } else {
        run_distributed(Arc::new(pipeline), args.ranks)?;
    }

    tracing::info!("Run complete");
    Ok(())
}
