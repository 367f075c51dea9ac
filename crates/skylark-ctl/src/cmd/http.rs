//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api/v1", port)
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Decode a JSON body, turning `{"error": ...}` responses into errors.
async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => bail!("{} ({})", body.error, status),
            Err(_) => bail!("request failed ({}): {}", status, text.trim()),
        }
    }
    resp.json::<T>().await.context("failed to parse response")
}

fn connect_error(url: &str) -> String {
    format!("failed to connect to skylarkd at {} (is it running?)", url)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    let resp = reqwest::get(url).await.with_context(|| connect_error(url))?;
    decode(resp).await
}

pub async fn post_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    let resp = reqwest::Client::new()
        .post(url)
        .send()
        .await
        .with_context(|| connect_error(url))?;
    decode(resp).await
}

pub async fn post_json_body<T, R>(url: &str, body: &T) -> Result<R>
where
    T: Serialize,
    R: for<'de> Deserialize<'de>,
{
    let resp = reqwest::Client::new()
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| connect_error(url))?;
    decode(resp).await
}

pub async fn delete_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    let resp = reqwest::Client::new()
        .delete(url)
        .send()
        .await
        .with_context(|| connect_error(url))?;
    decode(resp).await
}

#[derive(Deserialize)]
pub struct StatusResponse {
    pub status: String,
}
