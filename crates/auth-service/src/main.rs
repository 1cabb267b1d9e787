//! Auth Service
//!
//! gRPC service that verifies identity-provider bearer tokens.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics (only if `AUTH_METRICS_BIND_ADDRESS` is set)
//! 4. Fetch the provider key set (MUST succeed; no partial start)
//! 5. Serve `auth.Auth` until SIGINT/SIGTERM

#![warn(clippy::pedantic)]

use auth_service::auth::{KeyStore, KeyStoreConfig, TokenVerifier};
use auth_service::config::{Config, LogFormat};
use auth_service::grpc::AuthGrpcService;
use auth_service::observability::{init_tracing, metrics};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The log format is itself configuration, so load config first and
    // report a config error through the default format.
    let config = Config::from_env();
    init_tracing(
        config
            .as_ref()
            .map_or(LogFormat::Json, |config| config.log_format),
    );

    info!("Starting Auth Service");

    let config = config.map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        listen_address = %config.listen_address,
        keys_url = %config.keys_url,
        keys_fetch_timeout_secs = config.keys_fetch_timeout.as_secs(),
        refresh_on_miss = config.refresh_on_miss,
        clock_skew_secs = config.clock_skew.as_secs(),
        audience_check = config.expected_audience.is_some(),
        issuer_check = config.expected_issuer.is_some(),
        "Configuration loaded successfully"
    );

    if let Some(metrics_address) = &config.metrics_bind_address {
        let metrics_addr: SocketAddr = metrics_address.parse().map_err(|e| {
            error!(error = %e, addr = %metrics_address, "Invalid metrics bind address");
            format!("Invalid metrics bind address: {e}")
        })?;
        metrics::init_metrics_recorder(metrics_addr).map_err(|e| {
            error!(error = %e, "Failed to install Prometheus metrics recorder");
            e
        })?;
        info!(addr = %metrics_addr, "Prometheus exporter listening");
    }

    let grpc_addr: SocketAddr = config.listen_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.listen_address, "Invalid listen address");
        e
    })?;

    // Initial key fetch: the service cannot verify anything without it
    info!("Fetching provider key set...");
    let key_store = KeyStore::new(
        KeyStoreConfig::new(config.keys_url.clone())
            .with_fetch_timeout(config.keys_fetch_timeout)
            .with_refresh_on_miss(config.refresh_on_miss),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Initial provider key fetch failed");
        e
    })?;

    let mut verifier = TokenVerifier::new(Arc::new(key_store)).with_clock_skew(config.clock_skew);
    if let Some(audience) = &config.expected_audience {
        verifier = verifier.with_expected_audience(audience.clone());
    }
    if let Some(issuer) = &config.expected_issuer {
        verifier = verifier.with_expected_issuer(issuer.clone());
    }

    let auth_service = AuthGrpcService::new(Arc::new(verifier));

    let shutdown_token = CancellationToken::new();
    let grpc_shutdown_token = shutdown_token.child_token();
    let grpc_server = tonic::transport::Server::builder()
        .add_service(auth_service.into_server())
        .serve_with_shutdown(grpc_addr, async move {
            grpc_shutdown_token.cancelled().await;
            info!("gRPC server shutting down");
        });

    let server_handle = tokio::spawn(async move {
        info!(addr = %grpc_addr, "gRPC server starting");
        grpc_server.await
    });

    info!("Serving auth.Auth/Verify");
    let signal_name = shutdown_signal().await;

    info!(signal = signal_name, "Stopping: draining in-flight verifications");
    shutdown_token.cancel();

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "gRPC server failed");
            return Err(e.into());
        }
        Err(e) => {
            error!(error = %e, "gRPC server task panicked");
            return Err(e.into());
        }
    }

    info!("Stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM; returns the signal name for the shutdown log.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        #[expect(
            clippy::expect_used,
            reason = "Without a SIGINT handler the service could not drain in-flight verifications"
        )]
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Orchestrators stop the service with SIGTERM; startup must fail loudly if it cannot be observed"
        )]
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}
