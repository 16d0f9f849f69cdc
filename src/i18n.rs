//! Message catalogs with locale fallback.
//!
//! Every user-facing string the gateway sends over the mesh is looked up by key in a
//! catalog. A locale directory may carry flat `<locale>.toml` files (`key = "text"`)
//! that overlay the built-in default catalog; a missing file, a parse error, or a
//! missing key always falls back to the built-in text and never propagates an error
//! to the caller.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, warn};

/// Built-in default catalog. Keys are grouped by prefix:
/// `reject.*` admission rejections, `ack.*` acknowledgments, `notify.*` outcome
/// notifications, `osm.err.*` remote-submission error classes, `cmd.*` command output.
fn default_catalog() -> &'static [(&'static str, &'static str)] {
    &[
        (
            "reject.too_long",
            "Note text too long (max {max} bytes). Shorten the report and try again.",
        ),
        (
            "reject.no_position",
            "No GPS position is known for your device yet. Wait for your device to broadcast a position, then resend.",
        ),
        (
            "reject.no_fix",
            "Your device reports (0,0), which means no GPS fix yet. Wait for a fix and resend.",
        ),
        (
            "reject.invalid_lat",
            "Invalid GPS latitude {value}. Wait for a fresh fix and resend.",
        ),
        (
            "reject.invalid_lon",
            "Invalid GPS longitude {value}. Wait for a fresh fix and resend.",
        ),
        (
            "reject.recent_boot",
            "Your device started {uptime}s ago and its last GPS fix looks stale. Wait about {wait}s for GPS acquisition and resend.",
        ),
        (
            "reject.gps_not_ready",
            "Your device just started and has no GPS fix yet. Wait for GPS acquisition and resend.",
        ),
        (
            "reject.rate_limited",
            "Message limit reached. Wait {wait}s before sending another message.\nDo not send personal data or medical emergencies.",
        ),
        (
            "ack.queued",
            "Report queued as {queue_id}. You will get a DM when it reaches OpenStreetMap.",
        ),
        ("ack.success", "Note {id} created: {url}"),
        (
            "ack.duplicate",
            "Duplicate report detected; your earlier submission is already queued.",
        ),
        ("ack.location", "Location: {address}"),
        ("notify.sent", "{queue_id} -> note {id}: {url}"),
        (
            "notify.summary",
            "{count} queued report(s) reached OpenStreetMap. Send #osmlist for details.",
        ),
        (
            "notify.failed",
            "{count} report(s) failed after multiple attempts.\nError: {error}\nSend #osmlist for details.",
        ),
        (
            "reminder.privacy",
            "Reminder: notes are public. Do not include personal data.",
        ),
        ("osm.err.invalid", "OSM rejected the note data as invalid (HTTP {status})."),
        (
            "osm.err.forbidden",
            "Access denied or rate-limited by OSM (HTTP {status}).",
        ),
        (
            "osm.err.too_many",
            "Too many requests; OSM is throttling the gateway (HTTP {status}).",
        ),
        (
            "osm.err.unavailable",
            "OSM is temporarily unavailable (HTTP {status}). Will retry.",
        ),
        ("osm.err.server", "OSM server error (HTTP {status}). Will retry."),
        ("osm.err.unknown", "Unknown error from OSM (HTTP {status}): {detail}"),
        ("osm.err.unreachable", "Could not reach the OSM API: {detail}"),
        ("osm.err.max_retries", "Giving up after {max} failed attempts."),
        (
            "cmd.help",
            "Meshnotes commands:\n#osmnote <text> - report an OSM note at your position\n#osmlist - show your recent reports\n#osmhelp - this help",
        ),
        ("cmd.list.empty", "No reports on record for your device."),
        ("cmd.list.header", "Your recent reports:"),
    ]
}

/// Catalog holder for one active locale.
#[derive(Debug, Clone)]
pub struct I18n {
    locale: String,
    overlay: HashMap<String, String>,
    defaults: HashMap<&'static str, &'static str>,
}

impl I18n {
    /// Build a catalog with built-in defaults only.
    pub fn new(locale: &str) -> Self {
        Self {
            locale: locale.to_string(),
            overlay: HashMap::new(),
            defaults: default_catalog().iter().copied().collect(),
        }
    }

    /// Build a catalog for `locale`, overlaying `<dir>/<locale>.toml` if present and
    /// parseable. Any failure is logged and leaves the defaults in effect.
    pub fn load(locale: &str, dir: impl AsRef<Path>) -> Self {
        let mut i18n = Self::new(locale);
        let path = dir.as_ref().join(format!("{locale}.toml"));
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<HashMap<String, String>>(&content) {
                Ok(map) => {
                    debug!("Loaded {} message(s) for locale {} from {}", map.len(), locale, path.display());
                    i18n.overlay = map;
                }
                Err(e) => warn!("Ignoring unparseable locale file {}: {}", path.display(), e),
            },
            Err(_) => debug!("No locale file at {}; using built-in messages", path.display()),
        }
        i18n
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Look up a message by key, falling back to the built-in default catalog.
    /// Unknown keys return the key itself so a catalog gap is visible, not fatal.
    pub fn text(&self, key: &str) -> String {
        if let Some(s) = self.overlay.get(key) {
            return s.clone();
        }
        match self.defaults.get(key) {
            Some(s) => (*s).to_string(),
            None => {
                warn!("Missing i18n key: {key}");
                key.to_string()
            }
        }
    }

    /// Look up a message and substitute `{name}` placeholders.
    pub fn render(&self, key: &str, args: &[(&str, String)]) -> String {
        let mut out = self.text(key);
        for (name, value) in args {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}
