use oauth2_ldap_server::api::start_webserver;
use oauth2_ldap_server::config::load_config;
use oauth2_ldap_server::oauth2::OAuth2State;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "oauth2_ldap_server=info,tower_http=info,ldap3=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let layer = fmt::layer().with_target(true).with_level(true);

    tracing_subscriber::registry().with(env_filter).with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    // Loaded before tracing so RUST_LOG may come from .env. A missing file is fine.
    let dotenv = dotenvy::dotenv();

    initialize_tracing();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "loaded environment file");
    }

    let config = load_config()?;
    let state = OAuth2State::from_config(&config)?;

    start_webserver(state, &config.cors, config.listen_addr).await?;
    Ok(())
}
