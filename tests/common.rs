//! Test utilities & fixtures.
//! Mock collaborators for the transport and submitter seams, plus a config
//! preset tuned for fast deterministic tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use meshnotes::config::Config;
use meshnotes::mesh::MeshTransport;
use meshnotes::osm::NoteSubmitter;

/// Transport that records every DM. Clone the `sent` handle before moving the
/// transport into a dispatcher or gateway.
#[derive(Clone)]
#[allow(dead_code)]
pub struct RecordingTransport {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    /// When set, every send fails (for abort-on-failure tests).
    pub fail: Arc<Mutex<bool>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeshTransport for RecordingTransport {
    async fn send_direct_message(&mut self, node_id: &str, text: &str) -> bool {
        if *self.fail.lock().unwrap() {
            return false;
        }
        self.sent
            .lock()
            .unwrap()
            .push((node_id.to_string(), text.to_string()));
        true
    }
}

/// Submitter that replays a scripted sequence of responses; once the script is
/// exhausted it keeps returning the last response.
#[allow(dead_code)]
pub struct ScriptedSubmitter {
    responses: Mutex<VecDeque<(u16, String)>>,
    last: Mutex<Option<(u16, String)>>,
    pub calls: Arc<Mutex<usize>>,
}

#[allow(dead_code)]
impl ScriptedSubmitter {
    pub fn new(responses: Vec<(u16, String)>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Script a successful creation response for `note_id`.
    pub fn success(note_id: i64) -> (u16, String) {
        (
            200,
            format!(r#"{{"type":"Feature","properties":{{"id":{note_id}}}}}"#),
        )
    }

    /// Script a server-error response.
    pub fn server_error() -> (u16, String) {
        (500, "Internal Server Error".to_string())
    }
}

#[async_trait]
impl NoteSubmitter for ScriptedSubmitter {
    async fn submit_note(&self, _lat: f64, _lon: f64, _text: &str) -> Result<(u16, String)> {
        *self.calls.lock().unwrap() += 1;
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(resp) => {
                *self.last.lock().unwrap() = Some(resp.clone());
                Ok(resp)
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .map(Ok)
                .unwrap_or_else(|| Err(anyhow!("no scripted response"))),
        }
    }
}

/// Config preset: zero retry delay, no part pacing, generous anti-spam, sled
/// store under `data_dir`.
#[allow(dead_code)]
pub fn test_config(data_dir: &str) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_string();
    config.osm.retry_delay_secs = 0;
    config.osm.max_retries = 3;
    config.meshtastic.ack_part_delay_secs = 0;
    config.meshtastic.response_part_delay_secs = 0;
    config.limits.antispam_max = 10;
    config
}
