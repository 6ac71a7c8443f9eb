// Copyright (c) 2024 The container-trust-plugin Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use container_trust_plugin::{
    engine::{EngineClient, EngineHost, TlsOptions, DEFAULT_ENGINE_HOST},
    evaluator::{RegistryManifestSource, TrustPolicyEvaluator},
    Collaborators, PluginConfig, PluginServer, TrustPlugin,
};
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Engine API address
    ///
    /// `--host unix:///var/run/docker.sock` or `--host tcp://127.0.0.1:2376`
    #[arg(long, default_value = DEFAULT_ENGINE_HOST, env = "DOCKER_HOST")]
    host: String,

    /// Directory holding `cert.pem`, `key.pem` and `ca.pem` for a TCP engine
    #[arg(long, env = "DOCKER_CERT_PATH")]
    cert_path: Option<PathBuf>,

    /// Verify the engine's certificate
    #[arg(long, default_value_t = false)]
    tls_verify: bool,

    /// Path to the plugin config file
    ///
    /// `--config /etc/docker/trust-plugin.yaml`
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let config = PluginConfig::new(cli.config)?;
    if !config.enabled {
        warn!("Plugin is disabled, every request will be allowed");
    }

    let host: EngineHost = cli.host.parse()?;
    let tls = cli.cert_path.map(|cert_path| TlsOptions {
        cert_path,
        verify: cli.tls_verify,
    });
    let engine = Arc::new(EngineClient::new(&host, tls).context("create engine client")?);

    let manifests = Arc::new(RegistryManifestSource::new(
        config.insecure_registries.clone(),
    ));
    let evaluator = Arc::new(TrustPolicyEvaluator::new(&config.policy_path, manifests));

    let collaborators = Collaborators::new(engine.clone(), evaluator, engine)
        .with_auto_pull(config.auto_pull)
        .with_timeout(config.timeout());
    let plugin = TrustPlugin::new(config.enabled, collaborators);

    info!(
        "Trust plugin starts, engine {}, policy {}, auto pull {}",
        cli.host, config.policy_path, config.auto_pull
    );
    let server = PluginServer::new(&config.socket, plugin);

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = server.run() => res?,
        _ = hangup.recv() => {
            info!("Client terminal disconnected.");
        }
        _ = interrupt.recv() => {
            info!("SIGINT received, gracefully shutdown.");
        }
        _ = terminate.recv() => {
            info!("SIGTERM received, gracefully shutdown.");
        }
    };

    let _ = tokio::fs::remove_file(&config.socket).await;
    Ok(())
}
