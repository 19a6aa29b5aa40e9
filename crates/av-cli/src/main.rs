//! Attack-verification engine CLI (C13): argument parsing, back-end/ledger wiring, and the
//! one-shot or continuous run loop.

mod args;
mod prompt;

use std::sync::Arc;
use std::time::Instant;

use av_exec::{ContainerBackend, ExecutionBackend, RpcBackend};
use av_io::{Config, CvssFetcher, ModuleRepoParser, ReportEntry, ReportWriter};
use av_ledger::{MongoLedger, RunLedger};
use av_model::CliArgs;
use av_pipeline::{ModuleExecutor, NoPrompt, Prompter, VerificationPipeline};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use args::Args;
use prompt::StdinPrompter;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    if !args.continuous && args.event_file.is_none() {
        anyhow::bail!("-e/--event-file is required unless -c/--continuous is given");
    }

    let subnets = args.resolve_subnets()?;
    let config = args.to_config(subnets.clone());
    let cli_args: CliArgs = args.to_cli_args();

    info!(host = %config.ledger_host, port = config.ledger_port, "connecting to run ledger");
    let ledger: Arc<dyn RunLedger> = Arc::new(
        MongoLedger::connect(&config.ledger_host, config.ledger_port, &config.ledger_db_name).await?,
    );
    ledger.clear_run_caches().await?;

    info!("connecting to container back-end");
    let containers = Arc::new(ContainerBackend::connect()?);
    info!(endpoint = %args.rpc_endpoint, "connecting to exploitation-framework rpc back-end");
    let rpc = Arc::new(RpcBackend::connect(&args.rpc_endpoint, &args.rpc_user, &args.rpc_password).await?);
    let containers_exec: Arc<dyn ExecutionBackend> = containers.clone();
    let rpc_exec: Arc<dyn ExecutionBackend> = rpc.clone();

    info!(dir = %config.module_repo_dir.display(), "loading module repository");
    let (modules, vulns) = ModuleRepoParser::parse_directory(&config.module_repo_dir)?;
    info!(modules = modules.len(), vulns = vulns.len(), "module repository loaded");
    ledger.cache_modules(modules.clone()).await?;
    ledger.cache_vulns(vulns.clone()).await?;

    let prompter: Arc<dyn Prompter> = if config.manual_mode {
        Arc::new(StdinPrompter)
    } else {
        Arc::new(NoPrompt)
    };

    let executor = Arc::new(ModuleExecutor::new(
        containers_exec,
        rpc_exec,
        subnets,
        prompter,
        config.manual_mode,
        modules.clone(),
    ));
    let cvss = Arc::new(CvssFetcher::new(ledger.clone()));
    let pipeline = VerificationPipeline::new(
        executor,
        ledger.clone(),
        cvss,
        vulns,
        modules,
        config.module_timeout,
        config.verification_recency_threshold,
    );

    let outcome = if config.continuous_mode {
        run_continuous(&pipeline, &ledger, &cli_args).await
    } else {
        run_one_shot(&pipeline, &ledger, &config, &cli_args).await
    };

    if let Err(e) = conclude_run(&ledger, &config).await {
        tracing::warn!(error = %e, "failed to conclude run (report/ledger summary)");
    }
    containers.shutdown().await;
    rpc.shutdown().await;

    outcome
}

async fn run_one_shot(
    pipeline: &VerificationPipeline,
    ledger: &Arc<dyn RunLedger>,
    config: &Config,
    cli_args: &CliArgs,
) -> anyhow::Result<()> {
    let path = config.event_file.as_ref().expect("checked by caller");
    let raw_events = av_io::read_events(path)?;
    info!(count = raw_events.len(), file = %path.display(), "read event file");
    for event in raw_events {
        let event = ledger.cache_event(event).await?;
        pipeline.process_event(event, cli_args).await;
    }
    Ok(())
}

/// Polls the ledger's unprocessed-event queue on a fixed cadence, sleeping the remainder of
/// a `Config::POLL_INTERVAL` cycle, until the operator interrupts (§5, §6G).
async fn run_continuous(
    pipeline: &VerificationPipeline,
    ledger: &Arc<dyn RunLedger>,
    cli_args: &CliArgs,
) -> anyhow::Result<()> {
    info!("entering continuous poll mode (Ctrl-C to stop)");
    loop {
        let tick_start = Instant::now();
        let events = ledger.poll_unprocessed_events().await?;
        if !events.is_empty() {
            info!(count = events.len(), "polled unprocessed events");
        }
        for event in events {
            pipeline.process_event(event, cli_args).await;
        }

        let remaining = Config::POLL_INTERVAL.saturating_sub(tick_start.elapsed());
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(remaining) => {}
        }
    }
}

/// Summarizes every concluded `VerificationRecord` into `ReportEntry` rows, persists them to
/// the ledger exactly once, writes the CSV report, and clears the per-run caches (§6F, §9).
async fn conclude_run(ledger: &Arc<dyn RunLedger>, config: &Config) -> anyhow::Result<()> {
    let records = ledger.get_verification_data().await?;
    let rows: Vec<ReportEntry> = records.iter().map(ReportEntry::from_record).collect();

    let json_rows = rows
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    ledger.write_report_data(json_rows).await?;

    let writer = ReportWriter::new(&config.report_dir);
    let path = writer.write_report(&rows)?;
    info!(path = %path.display(), rows = rows.len(), "wrote verification report");

    ledger.clear_run_caches().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "fatal error, aborting");
        std::process::exit(1);
    }
}
