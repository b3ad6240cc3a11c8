//! Rulia plugin bridge CLI
//!
//! Runs bridge operations outside the app, for checking what a plugin
//! would see.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rulia_bridge::core::config::{CliArgs, Command, Config, RequestArgs};
use rulia_bridge::{core, EntryPoint, HttpRequest, RuliaHost};

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let config = match Config::load(&cli_args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    match cli_args.command {
        Command::Version => {
            println!("{}", config.app.version);
            Ok(())
        }
        Command::Request(args) => run_request(&config, args).await,
    }
}

async fn run_request(config: &Config, args: RequestArgs) -> Result<()> {
    let host = RuliaHost::from_config(config)?;
    let envelope = build_envelope(&args)?;

    let (rulia, pending) = host.begin_invocation(args.plugin.clone(), EntryPoint::Other("request".into()));
    info!(invocation_id = %rulia.invocation_id(), url = %envelope.url, "Running bridge request");

    match rulia.http_request(envelope).await {
        Ok(response) => {
            println!("{}", response);
            rulia.end()?;
        }
        Err(e) => {
            rulia.end_with_exception(e.to_string())?;
        }
    }
    drop(rulia);

    let finished = pending.wait().await?;
    info!(elapsed_ms = finished.elapsed.as_millis() as u64, "Bridge request finished");
    finished.outcome.into_result()?;
    Ok(())
}

fn build_envelope(args: &RequestArgs) -> Result<HttpRequest> {
    let mut envelope = HttpRequest::new(args.url.clone(), args.method.clone())
        .with_response_headers(args.with_headers);

    if let Some(payload) = &args.payload {
        envelope = envelope.with_payload(payload.clone());
    }
    if let Some(content_type) = &args.content_type {
        envelope = envelope.with_content_type(content_type.clone());
    }
    if let Some(timeout) = args.timeout {
        envelope = envelope.with_timeout(timeout);
    }
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("header must look like `Name: value`, got {:?}", header))?;
        envelope = envelope.with_header(name.trim(), value.trim());
    }

    Ok(envelope)
}
