use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use storefront_orders as api;
use storefront_orders::services::payment_gateway::{
    PaymentGateway, StripeGateway, UnconfiguredGateway,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = api::events::EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(api::events::process_events(event_rx));

    // Payment gateway
    let gateway: Arc<dyn PaymentGateway> = match cfg
        .payment_api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
    {
        Some(key) => {
            info!(base_url = %cfg.payment_api_base_url, "payment gateway configured");
            Arc::new(StripeGateway::new(
                key,
                cfg.payment_api_base_url.clone(),
                cfg.checkout_timeout(),
            )?)
        }
        None => {
            warn!("payment_api_key not set; online payment sessions are disabled");
            Arc::new(UnconfiguredGateway)
        }
    };
    if cfg.payment_webhook_secret.is_none() {
        warn!("payment_webhook_secret not set; every payment webhook will be rejected");
    }

    let port = cfg.port;
    let host = cfg.host.clone();
    let app_state = api::AppState::new(db_arc, cfg, Arc::new(event_sender), gateway);
    let app = api::build_router(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", host, port))?;
    info!("storefront-orders listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
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
