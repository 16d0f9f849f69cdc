//! Mesh transport seam.
//!
//! The physical Meshtastic radio link (serial framing, protobuf decoding, routing)
//! lives outside this crate. The gateway only needs one capability from it: deliver
//! a direct message to one node, best-effort. A radio integration implements
//! [`MeshTransport`] and feeds inbound traffic into the gateway's event channel as
//! [`MeshEvent`]s.

use async_trait::async_trait;
use log::info;

use crate::logutil::escape_log;

/// Inbound traffic from the mesh, as surfaced by the transport integration.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A text payload addressed to the gateway.
    Text { from: String, text: String },
    /// A position broadcast from a node.
    Position { from: String, lat: f64, lon: f64 },
    /// Device telemetry carrying seconds since boot.
    Telemetry { from: String, uptime_secs: u64 },
}

/// Best-effort direct-message delivery to one mesh node. The boolean is the only
/// delivery signal available; there is no end-to-end confirmation beyond it.
#[async_trait]
pub trait MeshTransport: Send {
    async fn send_direct_message(&mut self, node_id: &str, text: &str) -> bool;
}

/// Stand-in transport used when no radio integration is attached (development,
/// dry-run deployments). Logs every DM and reports success.
pub struct DryRunTransport;

#[async_trait]
impl MeshTransport for DryRunTransport {
    async fn send_direct_message(&mut self, node_id: &str, text: &str) -> bool {
        info!("[dry-run] DM to {}: {}", node_id, escape_log(text));
        true
    }
}
