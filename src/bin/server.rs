use storyboard_collab::{App, Config, OpenAccess};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Env vars may also be set externally; a missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(port = config.port, "starting collaboration server");
    tracing::warn!("access control: permissive (every join granted as owner), development only");

    let app = App::new(config, OpenAccess);
    app.run().await?;

    Ok(())
}
