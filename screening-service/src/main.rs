use leukemia_screening::{ScreeningConfig, create_app, init_tracing};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ScreeningConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    if config.advisory.api_key.is_none() {
        warn!("OPENROUTER_API_KEY not set, advisories will use the deterministic fallback");
    }

    let app = create_app(&config);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    let addr = listener.local_addr()?;

    info!(classifier = %config.classifier.base_url, model = %config.classifier.model, "Classifier backend configured");
    info!("Leukemia Screening Service starting on {}", addr);
    info!("Analysis endpoint: POST http://{}/screening/analyze", addr);
    info!("Report endpoint: POST http://{}/screening/report", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
