//! Binary entrypoint: serve the webhook endpoints.

use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;

use release_tracker::digest::HttpDigestResolver;
use release_tracker::notify::{LogNotifier, Notifier, SlackNotifier};
use release_tracker::{AppState, Cli, Engine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| "info".into());
  if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
    tracing_subscriber::fmt().json().with_env_filter(filter).init();
  } else {
    tracing_subscriber::fmt().with_env_filter(filter).init();
  }

  let cli = Cli::parse();
  let addr = cli.addr();
  let config = cli.into_config();

  let client = reqwest::Client::builder()
    .user_agent(concat!("release-tracker/", env!("CARGO_PKG_VERSION")))
    .build()?;

  let notifier: Arc<dyn Notifier> = match &config.slack_token {
    Some(token) => Arc::new(SlackNotifier::new(client.clone(), &config.slack_api_url, token)),
    None => Arc::new(LogNotifier::new()),
  };
  let resolver = Arc::new(HttpDigestResolver::new(client));

  tracing::info!(
    channel = %config.slack_channel,
    push_step = %config.push_step_name,
    update_notifications = config.update_notifications,
    "starting release tracker"
  );

  let state = AppState::new(Engine::new(config, notifier, resolver));
  let app = release_tracker::router(state).layer(CorsLayer::permissive());

  let listener = tokio::net::TcpListener::bind(addr).await?;
  tracing::info!("release-tracker listening on http://{}", addr);
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  tracing::info!("shutdown complete");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "failed to listen for Ctrl+C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
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
    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
    _ = terminate => tracing::info!("received SIGTERM, shutting down"),
  }
}
