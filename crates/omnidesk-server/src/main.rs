use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use omnidesk_server::{
    api::{build_app, default_rate_limit_state, AppState},
    auth::AuthState,
    mailer::AppMailer,
    scheduler,
    services::WorkerFlags,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(omnidesk_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = omnidesk_db::PoolConfig::from_app_config(&config);
    let pool = omnidesk_db::connect_pool(&config.database_url, pool_config).await?;
    omnidesk_db::run_migrations(&pool).await?;

    let state = AppState {
        pool,
        config: Arc::clone(&config),
        mailer: Arc::new(AppMailer::from_settings(config.smtp.as_ref())?),
        workers: WorkerFlags::default(),
        auth: AuthState::from_config(&config)?,
    };

    let _scheduler = scheduler::build_scheduler(state.clone()).await?;
    let app = build_app(state, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "omnidesk-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
