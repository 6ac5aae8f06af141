use goose::prelude::*;
use std::env;

/// Access token obtained when a simulated user starts.
struct AccessToken(String);

fn setting(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn password_form() -> Vec<(&'static str, String)> {
    vec![
        ("grant_type", "password".to_string()),
        ("client_id", setting("CLIENT_ID", "henry")),
        ("client_secret", setting("CLIENT_SECRET", "secret")),
        ("username", setting("LDAP_USERNAME", "henry")),
        ("password", setting("LDAP_PASSWORD", "secret")),
        ("scope", setting("SCOPE", "read write")),
    ]
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/healthz").await?;
    Ok(())
}

async fn password_grant(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.post_form("/oauth/token", &password_form()).await?;
    Ok(())
}

async fn login(user: &mut GooseUser) -> TransactionResult {
    let goose = user.post_form("/oauth/token", &password_form()).await?;
    let body = match goose.response {
        Ok(response) => response.text().await.unwrap_or_default(),
        Err(_) => String::new(),
    };
    if let Some(token) = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["access_token"].as_str().map(str::to_string))
    {
        user.set_session_data(AccessToken(token));
    }
    Ok(())
}

async fn get_principal(user: &mut GooseUser) -> TransactionResult {
    let token = match user.get_session_data::<AccessToken>() {
        Some(AccessToken(token)) => token.clone(),
        None => return Ok(()),
    };
    let request_builder = user
        .get_request_builder(&GooseMethod::Get, "/user/principal")?
        .bearer_auth(token);
    let goose_request = GooseRequest::builder()
        .set_request_builder(request_builder)
        .build();
    let _goose_metrics = user.request(goose_request).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    println!(
        "Authenticating as {} with client {}",
        setting("LDAP_USERNAME", "henry"),
        setting("CLIENT_ID", "henry")
    );

    GooseAttack::initialize()?
        .register_scenario(
            scenario!("HealthCheck").register_transaction(transaction!(health_check)),
        )
        .register_scenario(
            scenario!("TokenEndpoint").register_transaction(transaction!(password_grant)),
        )
        .register_scenario(
            scenario!("Principal")
                .register_transaction(transaction!(login).set_on_start())
                .register_transaction(transaction!(get_principal)),
        )
        .execute()
        .await?;

    Ok(())
}
