use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mailpool::api::CloudMailClient;
use mailpool::config::Config;
use mailpool::router::{MailpoolState, mailpool_router};
use mailpool::service::{AccountPool, RetirementReclaimer};
use mailpool::store::CredentialStore;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        accounts_dir = %cfg.pool.accounts_dir.display(),
        lease_duration_secs = cfg.pool.lease_duration_secs,
        cleanup_interval_secs = cfg.pool.cleanup_interval_secs,
        retention_hours = cfg.pool.retention_hours,
        mail_api = %cfg.mail.base_url,
        proxy = %cfg.mail.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.basic.loglevel,
    );

    let store = CredentialStore::open(&cfg.pool.accounts_dir).await?;
    let mail = Arc::new(CloudMailClient::new(&cfg.mail)?);
    let pool = Arc::new(AccountPool::new(store, cfg.pool.lease_duration(), mail));

    let cancel = shutdown_token();
    let reclaimer = RetirementReclaimer::new(
        pool.clone(),
        cfg.pool.cleanup_interval(),
        cfg.pool.retention(),
    )
    .spawn(cancel.clone());

    let state = MailpoolState::new(pool, cfg.pool.retention());
    let app = mailpool_router(state);

    let addr = cfg.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);

    let server_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await;

    // Stop the reclaimer even if the server exited on its own.
    cancel.cancel();
    reclaimer.await?;
    served?;
    info!("mailpool stopped");
    Ok(())
}

/// Cancelled on SIGINT or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, shutting down");
        }

        token_clone.cancel();
    });

    token
}
