//! OSM Notes API submission client.
//!
//! The retry-queue worker talks to the remote API through the [`NoteSubmitter`]
//! trait: one call, one `(status, body)` pair. Transport-level failures (timeout,
//! connect error) surface as `Err` and are classified by the worker like any other
//! retryable failure. [`OsmClient`] is the production implementation against the
//! OpenStreetMap Notes API (`POST /api/0.6/notes.json`).

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use tokio::time::timeout;

use crate::config::OsmConfig;

/// Remote note submission seam.
#[async_trait]
pub trait NoteSubmitter: Send {
    /// Submit one note. Returns the HTTP status and raw response body; a 2xx body
    /// is JSON whose `properties.id` carries the new note id.
    async fn submit_note(&self, lat: f64, lon: f64, text: &str) -> Result<(u16, String)>;
}

/// Production client for the OSM Notes API.
pub struct OsmClient {
    client: reqwest::Client,
    api_url: String,
    timeout: Duration,
}

impl OsmClient {
    pub fn new(config: &OsmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn notes_endpoint(&self) -> String {
        format!("{}/api/0.6/notes.json", self.api_url)
    }
}

#[async_trait]
impl NoteSubmitter for OsmClient {
    async fn submit_note(&self, lat: f64, lon: f64, text: &str) -> Result<(u16, String)> {
        let url = self.notes_endpoint();
        debug!("Submitting note to {} at ({}, {})", url, lat, lon);

        let request = self
            .client
            .post(&url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("text", text.to_string()),
            ])
            .header("User-Agent", concat!("meshnotes/", env!("CARGO_PKG_VERSION")));

        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| anyhow!("request timeout after {}s", self.timeout.as_secs()))?
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("failed to read response body: {}", e))?;
        Ok((status, body))
    }
}

/// Extract the note id from a successful creation response body.
pub fn parse_note_id(body: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("properties")?.get("id")?.as_i64()
}

/// Build the user-visible URL for a note id.
pub fn note_url(web_url: &str, note_id: i64) -> String {
    format!("{}/note/{}", web_url.trim_end_matches('/'), note_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_note_id_from_creation_body() {
        let body = r#"{"type":"Feature","properties":{"id":12345,"status":"open"}}"#;
        assert_eq!(parse_note_id(body), Some(12345));
    }

    #[test]
    fn rejects_bodies_without_id() {
        assert_eq!(parse_note_id("{}"), None);
        assert_eq!(parse_note_id("not json"), None);
    }

    #[test]
    fn note_url_trims_trailing_slash() {
        assert_eq!(
            note_url("https://www.openstreetmap.org/", 7),
            "https://www.openstreetmap.org/note/7"
        );
    }
}
