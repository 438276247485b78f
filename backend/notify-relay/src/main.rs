use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use notify_relay::{
    auth::ChecksumAuthenticator,
    broker::{AmqpConnector, BrokerConnector, BrokerRouter},
    config::Config,
    error::{AppError, AppResult},
    handlers, logging,
    state::AppState,
    tls,
    websocket::ConnectionRegistry,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[actix_web::main]
async fn main() -> AppResult<()> {
    if let Err(err) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("ERROR: failed to install rustls crypto provider: {:?}", err);
        return Err(AppError::StartServer(
            "failed to install rustls crypto provider".to_string(),
        ));
    }

    logging::init_tracing();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e);
        }
    };
    info!(config = ?cfg, "starting notify-relay");

    let index_template = cfg
        .index_template
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("index template {}: {e}", path.display()))
            })
        })
        .transpose()?;

    let registry = ConnectionRegistry::new();

    // Broker must be reachable at startup; later losses are retried
    let connector = AmqpConnector::new(cfg.broker());
    let source = connector.connect().await?;

    let router = BrokerRouter::new(registry.clone());
    let broker_status = router.status();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let router_task = tokio::spawn(router.run(connector, source, shutdown_rx));

    let mut state = AppState::new(
        registry.clone(),
        ChecksumAuthenticator::new(cfg.secret.clone()),
        cfg.session(),
        broker_status,
    );
    if let Some(template) = index_template {
        state = state.with_index_template(template);
    }

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::register_routes)
    })
    .disable_signals()
    .shutdown_timeout(cfg.shutdown_grace_secs);

    let server = match cfg.tls() {
        Some(tls_cfg) => {
            let server_config = tls::load_server_config(&tls_cfg)?;
            info!(addr = %cfg.addr, "listening with TLS");
            server
                .bind_rustls_0_23(&cfg.addr, server_config)
                .map_err(|e| AppError::StartServer(format!("bind {}: {e}", cfg.addr)))?
        }
        None => {
            info!(addr = %cfg.addr, "listening");
            server
                .bind(&cfg.addr)
                .map_err(|e| AppError::StartServer(format!("bind {}: {e}", cfg.addr)))?
        }
    }
    .run();

    let server_handle = server.handle();
    let signal_shutdown = shutdown_tx.clone();
    actix_web::rt::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");

        signal_shutdown.send_replace(true);
        let closed = registry.close_all().await;
        info!(sessions = closed, "closing sessions");

        server_handle.stop(true).await;
    });

    let result = server.await.map_err(AppError::from);

    shutdown_tx.send_replace(true);
    if tokio::time::timeout(cfg.shutdown_grace(), router_task)
        .await
        .is_err()
    {
        warn!("broker router did not stop within the grace period");
    }

    info!("notify-relay stopped");
    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM, waiting for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
