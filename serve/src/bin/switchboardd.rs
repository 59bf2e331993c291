//! Switchboard daemon: loads config, installs tracing, runs the supervisor.

use config::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = config::load_and_apply("switchboard", None) {
        eprintln!("config load: {}", e);
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,switchboard=debug")),
        )
        .init();

    serve::supervisor::run(Settings::from_env()).await
}
