use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hf_hub::api::tokio::Api;
use sdgate_core::{load_model, DeviceMap};
use sdgate_server::{logging, router, Config, InferenceGateway, KeepWarmJob};
use tokio::{self, net::TcpListener, signal};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let config = Config::parse();
    info!(?config, "starting sdgate");

    // Fail on a missing key before spending minutes on weights.
    let auth = config.auth_guard()?;
    let policy = config.generation_policy();

    let model = load_model(
        &config.model,
        Api::new().context("failed to create hf hub API")?,
        DeviceMap::from_cpu_flag(config.cpu),
    )
    .await?;

    let gateway = Arc::new(InferenceGateway::new(auth, model, policy));
    let app = router(Arc::clone(&gateway));

    let bind_address = config.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(
        address = %listener.local_addr()?,
        auth_mode = %gateway.auth_mode(),
        "gateway ready"
    );

    let keep_warm = if config.keep_warm {
        let job = KeepWarmJob::new(config.keep_warm_config())?;
        Some(tokio::spawn(job.run()))
    } else {
        None
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = keep_warm {
        handle.abort();
    }
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
