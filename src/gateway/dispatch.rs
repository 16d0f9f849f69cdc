//! Notification dispatcher: outcome DMs, anti-spam throttling, and segmentation.
//!
//! All outbound traffic to a device funnels through here, which is what makes the
//! per-device ordering guarantee hold: parts of one message are sent sequentially
//! with a fixed inter-part delay, and a failed part aborts the remainder. Outbound
//! volume per device is capped by a sliding anti-spam window independent of the
//! inbound rate limiter; when the cap is hit during notification passes, individual
//! messages collapse into a single batched summary.
//!
//! Segmentation respects the mesh frame budget in bytes: text at or under budget
//! goes out as a single unprefixed frame; anything longer is split at line, then
//! word, then character boundaries (always UTF-8 safe) with an `[i/N]` ordinal
//! prefix sized into the budget before splitting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::geocode::Geocoder;
use crate::i18n::I18n;
use crate::logutil::escape_log;
use crate::mesh::MeshTransport;
use crate::storage::{NoteRecord, Store};

/// Dispatcher configuration, lifted from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_frame_bytes: usize,
    pub antispam_window: Duration,
    pub antispam_max: usize,
    /// Inter-part delay for acknowledgments (short, urgent).
    pub ack_part_delay: Duration,
    /// Inter-part delay for command responses (longer, bulkier).
    pub response_part_delay: Duration,
    pub reminder_interval: u64,
    pub dry_run: bool,
}

/// Acknowledgment content by outcome kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Note reached OSM during admission (immediate submission path).
    Success {
        queue_id: String,
        note_id: i64,
        url: String,
    },
    /// Report accepted and queued for submission.
    Queued { queue_id: String },
    /// Exact duplicate of a recent report.
    Duplicate,
    /// Validation rejection; caller supplies the finished text.
    Reject { text: String },
}

/// Delivery status of one segmented send.
#[derive(Debug, Clone, Copy)]
struct SegmentedSend {
    /// At least the first part reached the device.
    delivered_first: bool,
    /// Every part reached the device.
    complete: bool,
}

pub struct NotificationDispatcher<T: MeshTransport> {
    transport: T,
    store: Store,
    geocoder: Geocoder,
    i18n: I18n,
    config: DispatchConfig,
    notified_times: HashMap<String, Vec<Instant>>,
}

impl<T: MeshTransport> NotificationDispatcher<T> {
    pub fn new(
        transport: T,
        store: Store,
        geocoder: Geocoder,
        i18n: I18n,
        config: DispatchConfig,
    ) -> Self {
        Self {
            transport,
            store,
            geocoder,
            i18n,
            config,
            notified_times: HashMap::new(),
        }
    }

    /// Send an acknowledgment DM for one admission or submission outcome.
    pub async fn send_ack(&mut self, node_id: &str, outcome: AckOutcome) {
        let message = match outcome {
            AckOutcome::Success {
                queue_id,
                note_id,
                url,
            } => {
                let mut msg = self.i18n.render(
                    "ack.success",
                    &[("id", note_id.to_string()), ("url", url)],
                );
                if let Some(location) = self.location_line(&queue_id).await {
                    msg.push('\n');
                    msg.push_str(&location);
                }
                if let Some(reminder) = self.privacy_reminder(node_id) {
                    msg.push('\n');
                    msg.push_str(&reminder);
                }
                msg
            }
            AckOutcome::Queued { queue_id } => {
                let mut msg = self
                    .i18n
                    .render("ack.queued", &[("queue_id", queue_id)]);
                if let Some(reminder) = self.privacy_reminder(node_id) {
                    msg.push('\n');
                    msg.push_str(&reminder);
                }
                msg
            }
            AckOutcome::Duplicate => self.i18n.text("ack.duplicate"),
            AckOutcome::Reject { text } => text,
        };

        self.send_with_antispam(node_id, &message, self.config.ack_part_delay)
            .await;
    }

    /// Send command output (`#osmlist`, help). Uses the wider response pacing.
    pub async fn send_command_response(&mut self, node_id: &str, text: &str) {
        self.send_with_antispam(node_id, text, self.config.response_part_delay)
            .await;
    }

    /// Drain queue entries that reached OSM but whose device was not informed
    /// yet. Throttled devices get one batched summary covering everything.
    pub async fn process_sent_notifications(&mut self) -> Result<()> {
        let pending = self.store.get_pending_for_notification()?;
        if pending.is_empty() {
            return Ok(());
        }

        for (node_id, notes) in group_by_node(pending) {
            if self.is_throttled(&node_id) {
                let summary = self
                    .i18n
                    .render("notify.summary", &[("count", notes.len().to_string())]);
                if self
                    .send_segmented(&node_id, &summary, self.config.ack_part_delay)
                    .await
                    .complete
                {
                    for note in &notes {
                        self.store.mark_notified(&note.queue_id)?;
                    }
                }
                continue;
            }

            for note in notes.iter().take(self.config.antispam_max) {
                let mut message = self.i18n.render(
                    "notify.sent",
                    &[
                        ("queue_id", note.queue_id.clone()),
                        ("id", note.osm_note_id.unwrap_or_default().to_string()),
                        ("url", note.osm_note_url.clone().unwrap_or_default()),
                    ],
                );
                if let Some(location) = self.location_line(&note.queue_id).await {
                    message.push('\n');
                    message.push_str(&location);
                }
                let sent = self
                    .send_segmented(&node_id, &message, self.config.ack_part_delay)
                    .await;
                if sent.delivered_first {
                    self.record_notification(&node_id);
                }
                if sent.complete {
                    self.store.mark_notified(&note.queue_id)?;
                }
            }
        }
        Ok(())
    }

    /// Inform devices of dead-lettered entries, one message per device naming
    /// the count and the first stored error. Throttled devices are retried on a
    /// later pass rather than dropped.
    pub async fn process_failed_notifications(&mut self) -> Result<()> {
        let failed = self.store.get_failed_for_notification()?;
        if failed.is_empty() {
            return Ok(());
        }

        for (node_id, notes) in group_by_node(failed) {
            if self.is_throttled(&node_id) {
                debug!("Anti-spam: deferring failure notice for {}", node_id);
                continue;
            }
            let first_error: String = notes[0]
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string())
                .chars()
                .take(100)
                .collect();
            let message = self.i18n.render(
                "notify.failed",
                &[
                    ("count", notes.len().to_string()),
                    ("error", first_error),
                ],
            );
            let sent = self
                .send_segmented(&node_id, &message, self.config.ack_part_delay)
                .await;
            if sent.delivered_first {
                self.record_notification(&node_id);
            }
            if sent.complete {
                for note in &notes {
                    self.store.mark_notified(&note.queue_id)?;
                }
            }
        }
        Ok(())
    }

    // ---- internals -------------------------------------------------------

    /// Best-effort geocoded location line for a queue entry.
    async fn location_line(&mut self, queue_id: &str) -> Option<String> {
        let note = self.store.get_note_by_queue_id(queue_id).ok()??;
        let address = self.geocoder.reverse_geocode(note.lat, note.lon).await?;
        Some(self.i18n.render("ack.location", &[("address", address)]))
    }

    /// Privacy reminder for every Nth accepted report. A stats failure skips the
    /// reminder; it must never block the ack itself.
    fn privacy_reminder(&self, node_id: &str) -> Option<String> {
        match self.store.get_node_stats(node_id) {
            Ok(stats) if stats.total > 0 && stats.total % self.config.reminder_interval == 0 => {
                Some(self.i18n.text("reminder.privacy"))
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Skipping reminder for {}: stats unavailable ({})", node_id, e);
                None
            }
        }
    }

    async fn send_with_antispam(&mut self, node_id: &str, text: &str, delay: Duration) -> bool {
        if self.is_throttled(node_id) {
            debug!("Anti-spam: suppressing DM to {}", node_id);
            return false;
        }
        let sent = self.send_segmented(node_id, text, delay).await;
        if sent.delivered_first {
            self.record_notification(node_id);
        }
        sent.complete
    }

    /// Send one logical message as paced `[i/N]` parts. A failed part aborts
    /// the remainder; `delivered_first` still reports whether anything reached
    /// the device, which is what counts toward the anti-spam window.
    async fn send_segmented(&mut self, node_id: &str, text: &str, delay: Duration) -> SegmentedSend {
        let parts = segment_message(text, self.config.max_frame_bytes);
        let total = parts.len();
        let mut delivered_first = false;
        for (idx, part) in parts.into_iter().enumerate() {
            if idx > 0 {
                sleep(delay).await;
            }
            if !self.send_part(node_id, &part).await {
                warn!(
                    "DM part {}/{} to {} failed; aborting remaining parts",
                    idx + 1,
                    total,
                    node_id
                );
                return SegmentedSend {
                    delivered_first,
                    complete: false,
                };
            }
            delivered_first = true;
        }
        SegmentedSend {
            delivered_first,
            complete: true,
        }
    }

    async fn send_part(&mut self, node_id: &str, text: &str) -> bool {
        if self.config.dry_run {
            info!("[dry-run] DM to {}: {}", node_id, escape_log(text));
            return true;
        }
        self.transport.send_direct_message(node_id, text).await
    }

    fn is_throttled(&mut self, node_id: &str) -> bool {
        let now = Instant::now();
        let window = self.config.antispam_window;
        let times = self.notified_times.entry(node_id.to_string()).or_default();
        times.retain(|t| now.duration_since(*t) < window);
        times.len() >= self.config.antispam_max
    }

    fn record_notification(&mut self, node_id: &str) {
        self.notified_times
            .entry(node_id.to_string())
            .or_default()
            .push(Instant::now());
    }
}

fn group_by_node(notes: Vec<NoteRecord>) -> HashMap<String, Vec<NoteRecord>> {
    let mut grouped: HashMap<String, Vec<NoteRecord>> = HashMap::new();
    for note in notes {
        grouped.entry(note.node_id.clone()).or_default().push(note);
    }
    grouped
}

/// Split `text` into mesh-frame-sized parts.
///
/// At or under `max_bytes` the text goes out verbatim as one part. Otherwise an
/// `[i/N] ` ordinal is reserved inside the budget and payloads are cut at the
/// last newline, else the last space, else the last UTF-8 character boundary
/// within the remaining budget. Separators stay with the earlier part, so the
/// concatenated payloads reconstruct the input exactly.
pub fn segment_message(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }

    // "[NN/NN] " is 8 bytes. Boundary-preferring splits can produce far more
    // parts than an even division of the budget would, so re-split with a wider
    // reservation whenever the realized part count needs more prefix digits
    // than were reserved.
    let mut reserve = 8usize;
    loop {
        let budget = max_bytes.saturating_sub(reserve).max(1);
        let payloads = split_payloads(text, budget);
        let total = payloads.len();
        let digits = total.to_string().len();
        let needed = 4 + 2 * digits; // "[i/N] " with i at most as wide as N
        if needed > reserve {
            reserve = needed;
            continue;
        }
        return payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| format!("[{}/{}] {}", i + 1, total, payload))
            .collect();
    }
}

fn split_payloads(text: &str, budget: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= budget {
            parts.push(remaining.to_string());
            break;
        }
        let mut end = budget;
        while end > 0 && !remaining.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // Budget smaller than one codepoint; emit the codepoint whole rather
            // than corrupt it.
            end = remaining.chars().next().map(char::len_utf8).unwrap_or(1);
        }
        let slice = &remaining[..end];
        let cut = slice
            .rfind('\n')
            .map(|p| p + 1)
            .or_else(|| slice.rfind(' ').map(|p| p + 1))
            .filter(|&c| c > 0 && c < remaining.len())
            .unwrap_or(end);
        parts.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }
    parts
}
