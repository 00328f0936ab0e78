use cinnabar_config::SessionConfig;
use cinnabar_session::SessionController;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/cinnabar/session.toml".to_string());
    let config = SessionConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")),
        )
        .init();

    info!(
        "CINNABAR: FIX session gateway starting (config {config_path}, version {ver})",
        ver = &config.fix_session_version
    );

    let controller = SessionController::new(config)?;
    loop {
        controller.run()?;
    }
}
