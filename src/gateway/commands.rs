//! Command parsing and the admission validator.
//!
//! The mesh command surface is tiny: `#osmnote <text>` files a report, `#osmlist`
//! shows the caller's recent queue entries, `#osmhelp` prints usage. Everything
//! else addressed to the gateway with a `#osm` prefix earns the help text; any
//! other traffic is none of our business.
//!
//! Admission is a fixed decision ladder: text length, position resolution (with
//! the `(0,0)` no-fix sentinel and range checks), device-uptime gating, duplicate
//! detection, then queue-entry creation. Devices acquire GPS slowly after boot;
//! without the uptime gate, the first minutes after power-on produce
//! confidently-wrong stale-position submissions.

use anyhow::Result;
use log::{debug, info};

use crate::gateway::position_cache::PositionCache;
use crate::i18n::I18n;
use crate::storage::Store;

/// Parsed gateway command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `#osmnote <text>` - report text (may be empty, rejected later).
    Note(String),
    /// `#osmlist` - list the caller's recent reports.
    List,
    /// `#osmhelp` or any unrecognized `#osm...` token.
    Help,
}

/// Parse inbound text. `None` means the message is not for the gateway.
pub fn parse(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    if let Some(rest) = lower.strip_prefix("#osmnote") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            // Preserve the original casing of the report body.
            let body = trimmed[trimmed.len() - rest.len()..].trim();
            return Some(Command::Note(body.to_string()));
        }
    }
    match lower.as_str() {
        "#osmlist" => Some(Command::List),
        "#osmhelp" => Some(Command::Help),
        _ if lower.starts_with("#osm") => Some(Command::Help),
        _ => None,
    }
}

/// Why a report was turned away. Rendered to user text via [`reject_text`].
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    TooLong { max: usize },
    NoPosition,
    /// The (0,0) sentinel the hardware reports before any fix is acquired.
    NoFix,
    InvalidLatitude { value: f64 },
    InvalidLongitude { value: f64 },
    /// Recently booted device with a position older than the GPS wait threshold.
    RecentBoot { uptime_secs: u64, wait_secs: u64 },
    /// Recently booted device with no position at all.
    GpsNotReady,
}

/// Admission outcome for one report.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Queued { queue_id: String },
    Duplicate { queue_id: String },
    Rejected(RejectReason),
}

/// Coordinate range check with the `(0,0)` no-fix sentinel. The sentinel is
/// numerically in-range but must never be treated as a real location.
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), RejectReason> {
    if lat == 0.0 && lon == 0.0 {
        return Err(RejectReason::NoFix);
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(RejectReason::InvalidLatitude { value: lat });
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(RejectReason::InvalidLongitude { value: lon });
    }
    Ok(())
}

/// Collapse whitespace and lowercase for duplicate matching.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Admission validator configuration, lifted from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_note_bytes: usize,
    pub uptime_recent_secs: u64,
    pub gps_wait_secs: u64,
    pub duplicate_window_secs: u64,
}

/// Decides whether an incoming report is queued, rejected, or a duplicate.
pub struct Validator {
    store: Store,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(store: Store, config: ValidatorConfig) -> Self {
        Self { store, config }
    }

    /// Run the admission ladder for one report. `device_uptime_secs` comes from
    /// telemetry and may be absent; absence disables the uptime gate entirely.
    pub fn admit(
        &self,
        cache: &mut PositionCache,
        node_id: &str,
        text: &str,
        device_uptime_secs: Option<u64>,
    ) -> Result<Admission> {
        if text.len() > self.config.max_note_bytes {
            return Ok(Admission::Rejected(RejectReason::TooLong {
                max: self.config.max_note_bytes,
            }));
        }

        let recently_booted = device_uptime_secs
            .map(|u| u < self.config.uptime_recent_secs)
            .unwrap_or(false);

        let position = match cache.get(node_id) {
            Some(pos) => pos,
            None => {
                // Distinct guidance: a fresh boot means GPS is still acquiring,
                // otherwise the device simply never broadcast a position.
                let reason = if recently_booted {
                    RejectReason::GpsNotReady
                } else {
                    RejectReason::NoPosition
                };
                return Ok(Admission::Rejected(reason));
            }
        };

        if let Err(reason) = validate_coordinates(position.lat, position.lon) {
            return Ok(Admission::Rejected(reason));
        }

        if recently_booted {
            let age = cache.age_secs(node_id).unwrap_or(i64::MAX);
            if age > self.config.gps_wait_secs as i64 {
                // Position predates this boot's GPS acquisition; suggest how long
                // until a fresh fix is plausible.
                let uptime = device_uptime_secs.unwrap_or(0);
                let wait = self.config.gps_wait_secs.saturating_sub(uptime);
                return Ok(Admission::Rejected(RejectReason::RecentBoot {
                    uptime_secs: uptime,
                    wait_secs: wait,
                }));
            }
        }

        let normalized = normalize_text(text);
        if let Some(queue_id) = self.store.find_recent_duplicate(
            node_id,
            &normalized,
            self.config.duplicate_window_secs,
        )? {
            debug!("Duplicate report from {} matches {}", node_id, queue_id);
            return Ok(Admission::Duplicate { queue_id });
        }

        let queue_id =
            self.store
                .create_note(node_id, position.lat, position.lon, text, &normalized)?;
        info!(
            "Queued report {} from {} at ({}, {})",
            queue_id, node_id, position.lat, position.lon
        );
        Ok(Admission::Queued { queue_id })
    }
}

/// Render a rejection reason into user-facing text.
pub fn reject_text(i18n: &I18n, reason: &RejectReason) -> String {
    match reason {
        RejectReason::TooLong { max } => {
            i18n.render("reject.too_long", &[("max", max.to_string())])
        }
        RejectReason::NoPosition => i18n.text("reject.no_position"),
        RejectReason::NoFix => i18n.text("reject.no_fix"),
        RejectReason::InvalidLatitude { value } => {
            i18n.render("reject.invalid_lat", &[("value", value.to_string())])
        }
        RejectReason::InvalidLongitude { value } => {
            i18n.render("reject.invalid_lon", &[("value", value.to_string())])
        }
        RejectReason::RecentBoot {
            uptime_secs,
            wait_secs,
        } => i18n.render(
            "reject.recent_boot",
            &[
                ("uptime", uptime_secs.to_string()),
                ("wait", wait_secs.to_string()),
            ],
        ),
        RejectReason::GpsNotReady => i18n.text("reject.gps_not_ready"),
    }
}
