//! Display utilities for CLI output formatting
//!
//! Renders the status line, headers and body of a response.

use colored::{ColoredString, Colorize};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

/// Status line coloured by class: green for 2xx, yellow for 3xx, red otherwise.
pub fn status_line(status: StatusCode) -> ColoredString {
    let line = status.to_string();
    if status.is_success() {
        line.bright_green()
    } else if status.is_redirection() {
        line.bright_yellow()
    } else {
        line.bright_red()
    }
}

/// Display response headers, hiding sensitive values.
pub fn display_headers(headers: &HeaderMap) {
    for (name, value) in headers {
        let value = if value.is_sensitive() {
            "[REDACTED]"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        println!("{} {value}", format!("{name}:").bright_blue());
    }
    println!();
}

/// Display a response body, pretty-printing JSON.
pub fn display_body(body: &str) {
    println!("{}", render_body(body));
}

fn render_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.to_string())
}
