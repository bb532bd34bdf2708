use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use results_store::{new_store, RecordStore, RetryingStore};
use scan_ingest::{
    run_until_shutdown, Consumer, ConsumerConfig, DrainOutcome, NatsSource, Processor, RunExit,
    ShutdownCoordinator,
};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod telemetry;

use config::ProcessorConfig;

#[derive(Debug, Parser)]
#[command(name = "scan-processor", version, about = "Persist scan results from the message queue")]
struct Cli {
    /// Config file (YAML). If omitted, loads ./processor.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Consume from the queue until SIGINT or SIGTERM
    Run,
    /// Process newline-delimited messages from FILE (or stdin) into the store
    Replay {
        file: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("scan-processor {} (core {})", env!("CARGO_PKG_VERSION"), scan_core::version());
        }
        Commands::ShowConfig => {
            let cfg = ProcessorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
            print!("{}", serde_yaml::to_string(&cfg)?);
        }
        Commands::Run => {
            let cfg = ProcessorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
            telemetry::init_logging(&cfg.logging)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run(cfg))?;
        }
        Commands::Replay { file } => {
            let cfg = ProcessorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
            telemetry::init_logging(&cfg.logging)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(replay(cfg, file))?;
        }
    }
    Ok(())
}

async fn connect_store(cfg: &ProcessorConfig) -> Result<Arc<dyn RecordStore>> {
    let inner = new_store(&cfg.store).context("failed to create data store")?;
    let mut store = RetryingStore::new(inner, cfg.service.retry);
    store
        .connect()
        .await
        .with_context(|| format!("failed to connect to {} store", store.kind()))?;
    let store: Arc<dyn RecordStore> = Arc::new(store);
    Ok(store)
}

async fn close_store(store: &dyn RecordStore) {
    if let Err(err) = store.close().await {
        warn!(error = %err, store = store.kind(), "failed to close store");
    }
}

fn processor(cfg: &ProcessorConfig, store: Arc<dyn RecordStore>) -> Processor {
    Processor::new(store).with_persist_timeout(cfg.service.persist_timeout())
}

async fn run(cfg: ProcessorConfig) -> Result<()> {
    info!(store = %cfg.store.kind, queue = %cfg.queue.url, "starting scan processor");
    let store = connect_store(&cfg).await?;
    let mut source = match NatsSource::connect(&cfg.queue).await {
        Ok(source) => source,
        Err(err) => {
            close_store(store.as_ref()).await;
            return Err(err).context("failed to subscribe to scan queue");
        }
    };

    let consumer = Consumer::new(
        Arc::new(processor(&cfg, Arc::clone(&store))),
        ConsumerConfig {
            max_outstanding: cfg.queue.max_outstanding_messages,
            receive_error_backoff: cfg.service.receive_error_backoff(),
        },
    );
    let coordinator = ShutdownCoordinator::new(cfg.service.grace());
    let signals = coordinator.listen_for_signals();

    let report = run_until_shutdown(&consumer, &mut source, &coordinator).await;
    signals.abort();
    if let DrainOutcome::Abandoned { in_flight } = report.drain {
        warn!(in_flight, "exiting with unsettled messages; they will be redelivered");
    }
    close_store(store.as_ref()).await;

    match report.exit {
        RunExit::Cancelled => {
            info!("scan processor stopped");
            Ok(())
        }
        RunExit::SourceClosed => {
            error!("message source closed unexpectedly");
            bail!("message source closed unexpectedly")
        }
    }
}

async fn replay(cfg: ProcessorConfig, file: Option<PathBuf>) -> Result<()> {
    let reader: Box<dyn BufRead> = match &file {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let store = connect_store(&cfg).await?;
    let processor = processor(&cfg, Arc::clone(&store));

    let mut processed = 0usize;
    let mut failed = 0usize;
    let mut out = std::io::stdout().lock();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        processed += 1;
        let result = match processor.process(raw.as_bytes()).await {
            Ok(()) => serde_json::json!({ "line": idx + 1, "status": "ok" }),
            Err(err) => {
                failed += 1;
                serde_json::json!({
                    "line": idx + 1,
                    "status": "error",
                    "kind": err.kind(),
                    "error": err.to_string(),
                })
            }
        };
        writeln!(out, "{}", serde_json::to_string(&result)?)?;
    }
    out.flush()?;

    close_store(store.as_ref()).await;
    info!(processed, failed, "replay finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_replay_with_global_config() {
        let cli = Cli::parse_from(["scan-processor", "replay", "scans.jsonl", "--config", "p.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("p.yaml")));
        assert!(matches!(cli.command, Commands::Replay { file: Some(ref f) } if f == &PathBuf::from("scans.jsonl")));
    }

    #[test]
    fn replay_reads_stdin_without_file() {
        let cli = Cli::parse_from(["scan-processor", "replay"]);
        assert!(matches!(cli.command, Commands::Replay { file: None }));
    }

    #[tokio::test]
    async fn replay_into_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scans.jsonl");
        std::fs::write(
            &input,
            concat!(
                "# captured from scans.>\n",
                r#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":0,"data_version":2,"data":{"response_str":"hello world"}}"#,
                "\n\n",
                r#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":0,"data_version":9,"data":{}}"#,
                "\n",
            ),
        )
        .unwrap();

        let mut cfg = ProcessorConfig::default();
        cfg.store.kind = "sqlite".into();
        cfg.store.sqlite.path = dir.path().join("scans.db");
        replay(cfg.clone(), Some(input)).await.unwrap();

        let mut check = results_store::SqliteStore::new(&cfg.store.sqlite).unwrap();
        check.connect().await.unwrap();
        assert_eq!(check.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_fails_fast_when_store_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ProcessorConfig::default();
        cfg.store.kind = "sqlite".into();
        cfg.store.sqlite.path = dir.path().join("missing").join("scans.db");
        let err = run(cfg).await.unwrap_err();
        assert!(err.to_string().contains("failed to connect to sqlite store"));
    }

    #[tokio::test]
    async fn unknown_store_type_is_rejected() {
        let mut cfg = ProcessorConfig::default();
        cfg.store.kind = "oracle".into();
        let err = connect_store(&cfg).await.err().unwrap();
        assert!(format!("{err:#}").contains("unsupported data store type: oracle"));
    }
}
