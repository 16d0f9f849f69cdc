//! # Gateway Module - Control plane for mesh-to-OSM reporting
//!
//! Ties the admission path and the background passes together:
//!
//! ```text
//! inbound text ─ RateLimiter ─ Validator ─(accept)─ queue row
//!                                  │                    │
//!                             PositionCache        Outbound ack ──┐
//!                                                                 │
//! task: OsmWorker::process_pending (interval)                     │
//! task: NotificationDispatcher ─ acks/responses (channel) ◄───────┘
//!                              └ notification passes (interval)
//! ```
//!
//! [`GatewayServer::run`] splits the work across three tasks: the event loop
//! (admission only, never awaits a send), a worker task draining the retry
//! queue on an interval, and a dispatcher task that owns all outbound traffic,
//! serving ack/response requests from a channel alongside its own notification
//! interval. Submission latency, the worker's intra-pass backoff sleep, and
//! inter-part send pacing therefore never delay admission of new inbound
//! messages. Each mutable structure (cache, limiter, anti-spam windows) has
//! exactly one owning task.

pub mod commands;
pub mod dispatch;
pub mod position_cache;
pub mod rate_limiter;
pub mod worker;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::geocode::Geocoder;
use crate::i18n::I18n;
use crate::logutil::escape_log;
use crate::mesh::{MeshEvent, MeshTransport};
use crate::osm::NoteSubmitter;
use crate::storage::{NoteState, Store};

use commands::{parse, reject_text, Admission, Command, Validator, ValidatorConfig};
use dispatch::{AckOutcome, DispatchConfig, NotificationDispatcher};
use position_cache::PositionCache;
use rate_limiter::{RateDecision, RateLimiter};
use worker::{OsmWorker, WorkerConfig};

pub use dispatch::segment_message;
pub use position_cache::POSITION_MAX_AGE_SECS;

/// How many entries `#osmlist` shows.
const LIST_LIMIT: usize = 5;

/// One outbound send request, produced by admission and consumed by the
/// dispatcher task.
#[derive(Debug)]
enum Outbound {
    Ack { node_id: String, outcome: AckOutcome },
    Response { node_id: String, text: String },
}

/// The synchronous admission path: command parsing, rate limiting, validation
/// and queries. Produces [`Outbound`] requests instead of sending, so the event
/// loop never awaits the transport.
struct AdmissionGate {
    store: Store,
    cache: PositionCache,
    limiter: RateLimiter,
    validator: Validator,
    i18n: I18n,
    /// Last reported uptime per node, fed by telemetry events.
    uptimes: HashMap<String, u64>,
}

impl AdmissionGate {
    fn handle(&mut self, event: MeshEvent) -> Option<Outbound> {
        match event {
            MeshEvent::Position { from, lat, lon } => {
                self.cache.update(&from, lat, lon);
                None
            }
            MeshEvent::Telemetry { from, uptime_secs } => {
                self.uptimes.insert(from, uptime_secs);
                None
            }
            MeshEvent::Text { from, text } => self.handle_text(&from, &text),
        }
    }

    fn handle_text(&mut self, from: &str, text: &str) -> Option<Outbound> {
        let command = match parse(text) {
            Some(cmd) => cmd,
            None => {
                debug!("Ignoring non-command text from {}: {}", from, escape_log(text));
                return None;
            }
        };

        if let RateDecision::Limited { wait_secs } = self.limiter.check(from) {
            let message = self
                .i18n
                .render("reject.rate_limited", &[("wait", wait_secs.to_string())]);
            return Some(Outbound::Ack {
                node_id: from.to_string(),
                outcome: AckOutcome::Reject { text: message },
            });
        }

        match command {
            Command::Note(body) => self.handle_note(from, &body),
            Command::List => self.handle_list(from),
            Command::Help => Some(Outbound::Response {
                node_id: from.to_string(),
                text: self.i18n.text("cmd.help"),
            }),
        }
    }

    fn handle_note(&mut self, from: &str, body: &str) -> Option<Outbound> {
        let uptime = self.uptimes.get(from).copied();
        let admission = match self.validator.admit(&mut self.cache, from, body, uptime) {
            Ok(a) => a,
            Err(e) => {
                error!("Admission failed for {}: {}", from, e);
                return None;
            }
        };

        let outcome = match admission {
            Admission::Queued { queue_id } => AckOutcome::Queued { queue_id },
            Admission::Duplicate { .. } => AckOutcome::Duplicate,
            Admission::Rejected(reason) => {
                info!("Rejected report from {}: {:?}", from, reason);
                AckOutcome::Reject {
                    text: reject_text(&self.i18n, &reason),
                }
            }
        };
        Some(Outbound::Ack {
            node_id: from.to_string(),
            outcome,
        })
    }

    fn handle_list(&mut self, from: &str) -> Option<Outbound> {
        let notes = match self.store.list_notes_for_node(from, LIST_LIMIT) {
            Ok(notes) => notes,
            Err(e) => {
                error!("List query failed for {}: {}", from, e);
                return None;
            }
        };
        let text = if notes.is_empty() {
            self.i18n.text("cmd.list.empty")
        } else {
            let mut lines = vec![self.i18n.text("cmd.list.header")];
            for note in notes {
                let mut line = format!("{} {}", note.queue_id, note.state.as_str());
                match note.state {
                    NoteState::Sent | NoteState::Notified => {
                        if let Some(id) = note.osm_note_id {
                            line.push_str(&format!(" note {}", id));
                        }
                    }
                    NoteState::Failed => {
                        if let Some(err) = &note.last_error {
                            let short: String = err.chars().take(60).collect();
                            line.push_str(&format!(" ({})", short));
                        }
                    }
                    NoteState::Pending => {}
                }
                lines.push(line);
            }
            lines.join("\n")
        };
        Some(Outbound::Response {
            node_id: from.to_string(),
            text,
        })
    }
}

async fn deliver<T: MeshTransport>(dispatcher: &mut NotificationDispatcher<T>, out: Outbound) {
    match out {
        Outbound::Ack { node_id, outcome } => dispatcher.send_ack(&node_id, outcome).await,
        Outbound::Response { node_id, text } => {
            dispatcher.send_command_response(&node_id, &text).await
        }
    }
}

/// The gateway control plane. Generic over the transport and submitter seams so
/// tests can drive it with mocks and deployments can plug in a real radio.
pub struct GatewayServer<T: MeshTransport, S: NoteSubmitter> {
    config: Config,
    gate: AdmissionGate,
    worker: OsmWorker<S>,
    dispatcher: NotificationDispatcher<T>,
    events: mpsc::Receiver<MeshEvent>,
}

impl<T: MeshTransport, S: NoteSubmitter> GatewayServer<T, S> {
    /// Wire up the gateway. Returns the server plus the sender the transport
    /// integration uses to feed inbound mesh traffic.
    pub fn new(
        config: Config,
        store: Store,
        transport: T,
        submitter: S,
    ) -> Result<(Self, mpsc::Sender<MeshEvent>)> {
        config.validate()?;
        let i18n = I18n::load(&config.gateway.locale, &config.gateway.locale_dir);

        let gate = AdmissionGate {
            store: store.clone(),
            cache: PositionCache::new(store.clone()),
            limiter: RateLimiter::new(
                config.limits.rate_window_secs,
                config.limits.rate_max_messages,
            ),
            validator: Validator::new(
                store.clone(),
                ValidatorConfig {
                    max_note_bytes: config.meshtastic.max_note_bytes,
                    uptime_recent_secs: config.limits.uptime_recent_secs,
                    gps_wait_secs: config.limits.gps_wait_secs,
                    duplicate_window_secs: config.gateway.duplicate_window_secs,
                },
            ),
            i18n: i18n.clone(),
            uptimes: HashMap::new(),
        };
        let worker = OsmWorker::new(
            store.clone(),
            submitter,
            i18n.clone(),
            WorkerConfig {
                max_retries: config.osm.max_retries,
                retry_delay: Duration::from_secs(config.osm.retry_delay_secs),
                web_url: config.osm.web_url.clone(),
            },
        );
        let dispatcher = NotificationDispatcher::new(
            transport,
            store,
            Geocoder::new(config.geocoding.clone()),
            i18n,
            DispatchConfig {
                max_frame_bytes: config.meshtastic.max_frame_bytes,
                antispam_window: Duration::from_secs(config.limits.antispam_window_secs),
                antispam_max: config.limits.antispam_max,
                ack_part_delay: Duration::from_secs(config.meshtastic.ack_part_delay_secs),
                response_part_delay: Duration::from_secs(
                    config.meshtastic.response_part_delay_secs,
                ),
                reminder_interval: config.gateway.reminder_interval,
                dry_run: config.gateway.dry_run,
            },
        );

        let (tx, rx) = mpsc::channel(64);
        Ok((
            Self {
                config,
                gate,
                worker,
                dispatcher,
                events: rx,
            },
            tx,
        ))
    }

    /// Run the gateway. Spawns the worker and dispatcher tasks, then serves the
    /// event loop until every event sender has been dropped.
    pub async fn run(self) -> Result<()>
    where
        T: 'static,
        S: 'static,
    {
        let GatewayServer {
            config,
            mut gate,
            mut worker,
            mut dispatcher,
            mut events,
        } = self;
        info!(
            "Gateway running (dry_run={}, osm={})",
            config.gateway.dry_run, config.osm.api_url
        );

        let poll_secs = config.osm.poll_interval_secs;
        let batch_limit = config.osm.batch_limit;
        let worker_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(poll_secs));
            loop {
                tick.tick().await;
                match worker.process_pending(batch_limit).await {
                    Ok(0) => {}
                    Ok(n) => info!("Worker pass submitted {} note(s)", n),
                    Err(e) => error!("Worker pass failed: {}", e),
                }
            }
        });

        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);
        let notify_secs = poll_secs.max(2) / 2;
        let dispatch_task = tokio::spawn(async move {
            let mut notify_tick = tokio::time::interval(Duration::from_secs(notify_secs));
            loop {
                tokio::select! {
                    out = out_rx.recv() => match out {
                        Some(out) => deliver(&mut dispatcher, out).await,
                        None => break,
                    },
                    _ = notify_tick.tick() => {
                        if let Err(e) = dispatcher.process_sent_notifications().await {
                            error!("Sent-notification pass failed: {}", e);
                        }
                        if let Err(e) = dispatcher.process_failed_notifications().await {
                            error!("Failed-notification pass failed: {}", e);
                        }
                    }
                }
            }
        });

        while let Some(event) = events.recv().await {
            if let Some(out) = gate.handle(event) {
                if out_tx.send(out).await.is_err() {
                    break;
                }
            }
        }
        info!("Event channel closed; shutting down");

        // Let the dispatcher drain queued acks, then stop the worker.
        drop(out_tx);
        let _ = dispatch_task.await;
        worker_task.abort();
        Ok(())
    }

    /// Process one inbound mesh event and send any resulting DM inline. Used by
    /// embedders that drive the gateway without [`GatewayServer::run`].
    pub async fn handle_event(&mut self, event: MeshEvent) {
        if let Some(out) = self.gate.handle(event) {
            deliver(&mut self.dispatcher, out).await;
        }
    }

    /// Direct worker access for integration tests and manual drains.
    pub fn worker_mut(&mut self) -> &mut OsmWorker<S> {
        &mut self.worker
    }

    /// Direct dispatcher access for integration tests.
    pub fn dispatcher_mut(&mut self) -> &mut NotificationDispatcher<T> {
        &mut self.dispatcher
    }

    /// Direct position-cache access (the transport integration may also feed
    /// positions through [`MeshEvent::Position`]).
    pub fn cache_mut(&mut self) -> &mut PositionCache {
        &mut self.gate.cache
    }
}
