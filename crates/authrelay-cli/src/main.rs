//! authrelay CLI - send one authenticated HTTP request
//!
//! The request goes through a shared client with the bearer hooks attached:
//! the current token is added as `Authorization: Bearer <token>`, and a 403
//! answer triggers one call to the refresh endpoint followed by one retry.
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::debug;
use reqwest::{Method, Url};

use authrelay_client::AuthInterceptor;
use authrelay_common::{AuthConfig, RefreshMethod};

mod display;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL to request, absolute or relative to the base URL
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,

    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL that relative URLs resolve against
    #[arg(long, env = "AUTHRELAY_BASE_URL")]
    base_url: Option<String>,

    /// Access token to start with
    #[arg(long, env = "AUTHRELAY_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Refresh endpoint, absolute or relative to the base URL
    #[arg(long)]
    refresh_url: Option<String>,

    /// Method used to call the refresh endpoint (get or post)
    #[arg(long, value_parser = parse_refresh_method)]
    refresh_method: Option<RefreshMethod>,

    /// JSON field of the refresh response holding the new token
    #[arg(long)]
    token_field: Option<String>,

    /// Request timeout in seconds (0 disables the timeout)
    #[arg(long)]
    timeout: Option<u64>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Extra request header, as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Print response headers
    #[arg(short, long)]
    include: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let url = resolve_url(&args.url, config.base_url.as_deref())?;

    let auth = AuthInterceptor::from_config(&config).context("Failed to set up client")?;

    debug!("Sending {} {url}", args.method);
    let mut request = auth.client().request(args.method.clone(), url);
    for (name, value) in &args.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(data) = &args.data {
        request = request.body(data.clone());
    }

    let response = request.send().await.context("Request failed")?;
    let status = response.status();

    println!("{}", display::status_line(status));
    if args.include {
        display::display_headers(response.headers());
    }
    let body = response.text().await.context("Failed to read response body")?;
    if !body.is_empty() {
        display::display_body(&body);
    }

    Ok(if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Loads the configuration file, if any, and applies command line overrides.
fn build_config(args: &Args) -> Result<AuthConfig> {
    let mut config = match &args.config {
        Some(path) => AuthConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AuthConfig::default(),
    };

    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url);
    }
    if let Some(token) = &args.token {
        config = config.with_access_token(token);
    }
    if let Some(refresh_url) = &args.refresh_url {
        config = config.with_refresh_url(refresh_url);
    }
    if let Some(refresh_method) = args.refresh_method {
        config = config.with_refresh_method(refresh_method);
    }
    if let Some(token_field) = &args.token_field {
        config = config.with_token_field(token_field);
    }
    if let Some(timeout) = args.timeout {
        config = config.with_timeout_seconds((timeout > 0).then_some(timeout));
    }

    // An absolute request URL supplies the base for a relative refresh URL.
    if config.base_url.is_none()
        && let Ok(url) = Url::parse(&args.url)
        && url.origin().is_tuple()
    {
        config = config.with_base_url(url.origin().ascii_serialization());
    }
    if config.base_url.is_none()
        && matches!(
            Url::parse(&config.refresh_url),
            Err(url::ParseError::RelativeUrlWithoutBase)
        )
    {
        bail!(
            "refresh URL '{}' is relative and there is no base URL to resolve it against; \
             pass --base-url or an absolute --refresh-url",
            config.refresh_url
        );
    }

    config.validate()?;
    Ok(config)
}

fn resolve_url(url: &str, base_url: Option<&str>) -> Result<Url> {
    match Url::parse(url) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base_url =
                base_url.ok_or_else(|| anyhow!("'{url}' is relative but no base URL is set"))?;
            Ok(Url::parse(base_url)?.join(url)?)
        }
        Err(e) => Err(anyhow!("Invalid URL '{url}': {e}")),
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_refresh_method(raw: &str) -> Result<RefreshMethod, String> {
    match raw.to_ascii_lowercase().as_str() {
        "get" => Ok(RefreshMethod::Get),
        "post" => Ok(RefreshMethod::Post),
        other => Err(format!("unsupported refresh method '{other}'")),
    }
}
