use meridian_clock::SystemClock;
use meridian_gateway::{
    JsonLinesAuditSink, LogAlertSink, MemoryAuditSink, ObservationMessage, PaperBroker,
};
use meridian_ports::{AuditSink, Clock};
use meridian_runner::{CoreConfig, DecisionCore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

fn print_help() {
    eprintln!(
        r#"Meridian - signal aggregation and risk gating core

Reads JSON-lines observations on stdin, decides them against the paper
broker and prints a portfolio summary on EOF or Ctrl-C.

USAGE:
    meridian [OPTIONS] < observations.jsonl

OPTIONS:
    --config <PATH>     Load configuration from JSON file
    --audit <PATH>      Append audit records to a JSON-lines file
    --help              Print this help message

ENVIRONMENT VARIABLES:
    MERIDIAN_OPERATOR_TOKEN   Credential required to reset a halted circuit
    RUST_LOG                  Log level filter (default: info)

EXAMPLES:
    # Run with defaults, audit kept in memory
    meridian < observations.jsonl

    # Run with config file and a persistent audit trail
    meridian --config meridian.json --audit audit.jsonl < observations.jsonl
"#
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;
    let mut audit_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = Some(args[i].clone());
            }
            "--audit" | "-a" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --audit requires a path argument");
                    std::process::exit(1);
                }
                audit_path = Some(args[i].clone());
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => {
            log::info!("Loading configuration from: {}", path);
            CoreConfig::from_file(&path)?
        }
        None => {
            log::info!("Using default configuration");
            CoreConfig::default()
        }
    };
    if let Ok(token) = std::env::var("MERIDIAN_OPERATOR_TOKEN") {
        config.breaker.operator_token = token;
    }
    config.validate()?;

    let audit: Arc<dyn AuditSink> = match audit_path {
        Some(path) => {
            log::info!("Audit trail: {}", path);
            Arc::new(JsonLinesAuditSink::open(&path).await?)
        }
        None => Arc::new(MemoryAuditSink::new()),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let broker = Arc::new(PaperBroker::new(config.paper_broker.clone(), clock.clone()));
    let core = DecisionCore::start(config, broker, audit, Arc::new(LogAlertSink), clock);
    let bus = core.bus();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0u64;
    let mut refused = 0u64;
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let parsed = ObservationMessage::from_json(&line);
        core.record_source_outcome("stdin", parsed.is_ok());
        let submitted = match parsed {
            Ok(msg) => bus.submit(msg).await,
            Err(e) => Err(e),
        };
        match submitted {
            Ok(_) => accepted += 1,
            Err(e) => {
                refused += 1;
                log::warn!("Observation refused: {}", e);
            }
        }
    }

    log::info!(
        "Input closed: {} observations accepted, {} refused",
        accepted,
        refused
    );
    core.tick_now().await;

    let report = core.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
