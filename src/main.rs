use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secretsctx::aws::{Credentials, SecretsManagerClient, SsmClient};
use secretsctx::cli;
use secretsctx::config::{self, Config};
use secretsctx::coordinator::Coordinator;
use secretsctx::extension::ExtensionClient;
use secretsctx::process::patch::patch_process;
use secretsctx::proxy::{self, ProxyState, UpstreamClient};
use secretsctx::secrets::{self, ContextHandle, Resolver, SecretReference};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Lambda's advanced logging controls ask for JSON via this variable.
    let json_logs = std::env::var("AWS_LAMBDA_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "secretsctx=info".into()),
        ))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    let args = cli::Cli::parse();
    let cfg = config::load(&args)?;

    let references = secrets::declarations_from_env()?;

    if let Err(e) = run(cfg, references).await {
        tracing::error!("secretsctx exiting: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cfg: Config, references: Vec<SecretReference>) -> anyhow::Result<()> {
    // Redirect the runtime before anything can talk to it.
    if cfg.skip_patch {
        tracing::info!("skipping runtime address patch");
    } else {
        let (search, replace) = cfg.redirect()?;
        let pid = cfg.target_pid;
        let patched = tokio::task::spawn_blocking(move || {
            patch_process(pid, search.as_bytes(), replace.as_bytes())
        })
        .await
        .context("patch task panicked")??;

        if patched == 0 {
            tracing::warn!(pid, "runtime API address not found in target memory");
        } else {
            tracing::info!(pid, patched, "redirected runtime API to {}", cfg.proxy_addr);
        }
    }

    let listener = proxy::bind(cfg.proxy_addr).await?;

    // The backends are never called when nothing is declared.
    let (region, credentials) = if references.is_empty() {
        (String::new(), Credentials::default())
    } else {
        (cfg.require_region()?, cfg.require_credentials()?)
    };
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build AWS HTTP client")?;
    let parameters = Arc::new(SsmClient::new(
        http.clone(),
        cfg.ssm_endpoint.clone(),
        &region,
        credentials.clone(),
    ));
    let secret_store = Arc::new(SecretsManagerClient::new(
        http,
        cfg.secrets_manager_endpoint.clone(),
        &region,
        credentials,
    ));

    let context = ContextHandle::new();
    let resolver = Resolver::new(references, parameters, secret_store, context.clone());
    let (completions_tx, completions_rx) = proxy::rendezvous();

    let state = Arc::new(ProxyState {
        upstream: UpstreamClient::new(&cfg.runtime_api)?,
        context,
        completions: completions_tx,
    });

    let mut coordinator = Coordinator::new(
        resolver,
        ExtensionClient::new(&cfg.runtime_api)?,
        completions_rx,
        cfg.extension_name.clone(),
    )
    .refresh_every(cfg.refresh_interval)
    .tolerate_refresh_errors(cfg.tolerate_refresh_errors);

    tokio::select! {
        served = proxy::serve(listener, state) => served?,
        finished = coordinator.run() => {
            finished?;
            tracing::info!("lifecycle finished, exiting");
        }
    }
    Ok(())
}
