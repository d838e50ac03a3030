//! loadmeter_agent entry point: parse config, then serve the dashboard and `/start`.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use loadmeter_agent::config::{self, Command, USAGE};
use loadmeter_agent::server::router;
use loadmeter_agent::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match config::from_env_and_args() {
        Ok(Command::Serve(cfg)) => cfg,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return Ok(());
        }
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let addr = cfg.listen_addr();
    let app = router(AppState::new(cfg));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("loadmeter agent listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("loadmeter agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    // an unavailable signal handler just means we run until killed
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
