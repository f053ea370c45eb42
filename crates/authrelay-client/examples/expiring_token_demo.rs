//! Expiring Token Demo
//!
//! Runs a local mock API whose first token has already expired, then sends a
//! request through an authenticated client. The client is rejected with 403,
//! calls the refresh endpoint, and retries with the new token.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=authrelay_client=debug cargo run --example expiring_token_demo
//! ```

use anyhow::Result;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use authrelay_client::AuthInterceptor;
use authrelay_common::{AuthConfig, CredentialStore};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/employees"))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "fresh"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/employees"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"firstname": "Dave", "lastname": "Gray"},
            {"firstname": "John", "lastname": "Smith"}
        ])))
        .mount(&server)
        .await;

    let config = AuthConfig::new(server.uri()).with_access_token("expired");
    let auth = AuthInterceptor::from_config(&config)?;

    let response = auth
        .client()
        .get(format!("{}/employees", server.uri()))
        .send()
        .await?;

    println!("Status: {}", response.status());
    println!("Body: {}", response.text().await?);

    let token_refreshed = auth
        .store()
        .current()
        .is_some_and(|credential| credential.expose() == "fresh");
    println!("Token refreshed: {token_refreshed}");

    Ok(())
}
