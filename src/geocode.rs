//! Best-effort reverse geocoding via OSM Nominatim.
//!
//! Used only to append a human-readable location line to success notifications.
//! Every failure mode (disabled, timeout, HTTP error, unparseable body, no usable
//! address components) collapses to `None`; this module never fails a caller.

use std::time::{Duration, Instant};

use log::debug;
use serde_json::Value;
use tokio::time::timeout;

use crate::config::GeocodingConfig;

/// Minimum spacing between requests, per the Nominatim usage policy.
const MIN_REQUEST_GAP: Duration = Duration::from_secs(1);

pub struct Geocoder {
    config: GeocodingConfig,
    client: reqwest::Client,
    last_request: Option<Instant>,
}

impl Geocoder {
    pub fn new(config: GeocodingConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            last_request: None,
        }
    }

    /// Resolve coordinates to "neighbourhood, city, state, country" (whichever
    /// components exist). Returns `None` on any failure.
    pub async fn reverse_geocode(&mut self, lat: f64, lon: f64) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        // Honor the 1 req/s policy across calls.
        if let Some(last) = self.last_request {
            let since = last.elapsed();
            if since < MIN_REQUEST_GAP {
                tokio::time::sleep(MIN_REQUEST_GAP - since).await;
            }
        }

        let request = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("format", "json".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .header("User-Agent", concat!("meshnotes/", env!("CARGO_PKG_VERSION")));

        let result = timeout(Duration::from_secs(self.config.timeout_secs), request.send()).await;
        self.last_request = Some(Instant::now());

        let response = match result {
            Ok(Ok(r)) if r.status().is_success() => r,
            Ok(Ok(r)) => {
                debug!("Geocoding API returned status {}", r.status());
                return None;
            }
            Ok(Err(e)) => {
                debug!("Geocoding request failed: {}", e);
                return None;
            }
            Err(_) => {
                debug!("Geocoding request timed out");
                return None;
            }
        };

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                debug!("Unparseable geocoding response: {}", e);
                return None;
            }
        };

        format_address(body.get("address"))
    }
}

/// Build an address line from Nominatim components, most local first.
fn format_address(address: Option<&Value>) -> Option<String> {
    let address = address?;
    let field = |names: &[&str]| -> Option<String> {
        names
            .iter()
            .find_map(|n| address.get(*n).and_then(Value::as_str))
            .map(str::to_string)
    };

    let mut parts: Vec<String> = Vec::new();
    let neighbourhood = field(&["neighbourhood", "suburb", "quarter", "village"]);
    if let Some(n) = &neighbourhood {
        parts.push(n.clone());
    }
    if let Some(city) = field(&["city", "town", "municipality"]) {
        if neighbourhood.as_deref() != Some(city.as_str()) {
            parts.push(city);
        }
    }
    if let Some(state) = field(&["state", "region"]) {
        parts.push(state);
    }
    if let Some(country) = field(&["country"]) {
        parts.push(country);
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_full_address() {
        let addr = json!({
            "suburb": "Prado Veraniego",
            "city": "Bogotá",
            "state": "Bogotá D.C.",
            "country": "Colombia"
        });
        assert_eq!(
            format_address(Some(&addr)),
            Some("Prado Veraniego, Bogotá, Bogotá D.C., Colombia".to_string())
        );
    }

    #[test]
    fn skips_duplicate_city_and_empty_addresses() {
        let addr = json!({ "village": "Gouda", "municipality": "Gouda", "country": "Netherlands" });
        assert_eq!(format_address(Some(&addr)), Some("Gouda, Netherlands".to_string()));
        assert_eq!(format_address(Some(&json!({}))), None);
        assert_eq!(format_address(None), None);
    }
}
