// Main CLI entry point for Aperture
// Uses clap for argument parsing and tracing for console output

use anyhow::{bail, Context, Result};
use aperture::engine::AttackEngine;
use aperture::identity::IdentityPool;
use aperture::parsers::load_contract;
use aperture::progress::{self, ExecutionContext};
use aperture::reporting::{render_summary, write_report, ReportFormat};
use aperture::runner::{ScanOptions, Scanner};
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("aperture")
        .version("0.1.0")
        .author("Jake Abendroth")
        .about("Differential IDOR scanner driven by an OpenAPI contract and a pool of test identities")
        .after_help("EXAMPLES:\n  aperture --spec openapi.yaml --config users.yaml\n  aperture -s https://api.example.com/openapi.json -c users.yaml -b http://localhost:8080 --format csv -o report.csv\n  aperture -s openapi.json -c users.yaml --skip-delete --jsonl -v")
        .arg(Arg::new("spec")
            .short('s')
            .long("spec")
            .required(true)
            .num_args(1)
            .help("OpenAPI document (file path or http(s) URL, JSON or YAML)"))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .required(true)
            .num_args(1)
            .value_parser(value_parser!(PathBuf))
            .help("YAML file listing the test identities"))
        .arg(Arg::new("base_url")
            .short('b')
            .long("base-url")
            .num_args(1)
            .help("Base URL of the target API (defaults to the first server in the OpenAPI document)"))
        .arg(Arg::new("out")
            .short('o')
            .long("out")
            .num_args(1)
            .default_value("aperture_log.txt")
            .value_parser(value_parser!(PathBuf))
            .help("Where to write the result log"))
        .arg(Arg::new("format")
            .long("format")
            .num_args(1)
            .default_value("text")
            .value_parser(["text", "jsonl", "csv"])
            .help("Result log format"))
        .arg(Arg::new("jsonl")
            .long("jsonl")
            .action(ArgAction::SetTrue)
            .help("Shorthand for --format jsonl"))
        .arg(Arg::new("timeout")
            .long("timeout")
            .num_args(1)
            .default_value("20")
            .value_parser(value_parser!(u64))
            .help("Per-request timeout in seconds"))
        .arg(Arg::new("skip_delete")
            .long("skip-delete")
            .action(ArgAction::SetTrue)
            .help("Do not send DELETE requests"))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(ArgAction::SetTrue)
            .help("Log every prepared request"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let default_level = if matches.get_flag("verbose") { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // clap enforces presence and defaults for these
    let spec = matches.get_one::<String>("spec").cloned().unwrap_or_default();
    let config = matches.get_one::<PathBuf>("config").cloned().unwrap_or_default();
    let out = matches
        .get_one::<PathBuf>("out")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("aperture_log.txt"));
    let timeout = matches.get_one::<u64>("timeout").copied().unwrap_or(20);
    let format = if matches.get_flag("jsonl") {
        ReportFormat::Jsonl
    } else {
        matches
            .get_one::<String>("format")
            .and_then(|f| ReportFormat::parse(f))
            .unwrap_or_default()
    };
    let options = ScanOptions {
        skip_delete: matches.get_flag("skip_delete"),
    };

    let contract = load_contract(&spec)
        .await
        .with_context(|| format!("failed to load spec {}", spec))?;
    let pool = IdentityPool::load(&config)
        .with_context(|| format!("failed to load config {}", config.display()))?;

    let base_url = match matches.get_one::<String>("base_url").or(contract.base_url.as_ref()) {
        Some(url) => url.clone(),
        None => bail!("no base URL: pass --base-url or declare a server in the OpenAPI document"),
    };
    info!(
        "Loaded {} operations, {} identities; target {}",
        contract.operations().len(),
        pool.len(),
        base_url
    );

    let engine = AttackEngine::new(
        &base_url,
        Duration::from_secs(timeout),
        &pool.default_auth_header_name,
    )
    .context("failed to set up the HTTP client")?;
    let scanner = Scanner::new(&contract, &pool, engine, options);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping scan");
            let _ = cancel_tx.send(true);
        }
    });

    let (emitter, events) = progress::channel();
    let consumer = tokio::spawn(progress::log_progress(events));
    let mut ctx = ExecutionContext::new(emitter);

    let report = scanner.execute(&mut ctx, cancel_rx).await;
    drop(ctx);
    let _ = consumer.await;

    write_report(&out, format, &report.records, &base_url)
        .with_context(|| format!("failed to write {}", out.display()))?;
    info!("Wrote {} records ({}) to {}", report.records.len(), format, out.display());

    print!("{}", render_summary(&report));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let m = cli()
            .try_get_matches_from(["aperture", "-s", "spec.yaml", "-c", "users.yaml"])
            .unwrap();
        assert_eq!(m.get_one::<String>("format").map(String::as_str), Some("text"));
        assert_eq!(m.get_one::<u64>("timeout"), Some(&20));
        assert_eq!(m.get_one::<PathBuf>("out"), Some(&PathBuf::from("aperture_log.txt")));
        assert!(!m.get_flag("skip_delete"));
    }

    #[test]
    fn cli_requires_spec_and_config() {
        assert!(cli().try_get_matches_from(["aperture", "-s", "spec.yaml"]).is_err());
        assert!(cli()
            .try_get_matches_from(["aperture", "-s", "a", "-c", "b", "--format", "pdf"])
            .is_err());
    }
}
