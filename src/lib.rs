//! # Meshnotes - OpenStreetMap Notes gateway for Meshtastic networks
//!
//! Meshnotes bridges a Meshtastic LoRa mesh to the OpenStreetMap Notes API. Field
//! devices send short text commands over the mesh; the gateway validates them against
//! the device's last-known GPS position and uptime, durably queues accepted reports,
//! submits them to OSM with retry/backoff, and pushes delivery outcomes back to the
//! originating device as direct messages sized for the mesh frame budget.
//!
//! ## Features
//!
//! - **Admission validation**: GPS freshness, coordinate range, and device-uptime
//!   heuristics decide whether a report is queued or rejected with actionable text.
//! - **Durable retry queue**: accepted reports survive restarts in an embedded sled
//!   store; a worker drains them with per-entry retry ceilings and backoff.
//! - **Mesh-aware notifications**: outbound DMs are anti-spam throttled per device
//!   and split into ordered `[i/N]` parts that fit the ~230-byte frame budget.
//! - **Best-effort enrichment**: Nominatim reverse geocoding annotates successful
//!   notes with a human-readable location; failures never block delivery.
//! - **Async design**: built with Tokio so network submission and paced sends never
//!   delay admission of new inbound messages.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshnotes::config::Config;
//! use meshnotes::gateway::GatewayServer;
//! use meshnotes::mesh::DryRunTransport;
//! use meshnotes::osm::OsmClient;
//! use meshnotes::storage::Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = Store::open(&config.storage.data_dir)?;
//!     let submitter = OsmClient::new(&config.osm);
//!     let (gateway, _events) =
//!         GatewayServer::new(config, store, DryRunTransport, submitter)?;
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`gateway`] - Core control plane: admission, retry worker, notifications
//! - [`storage`] - Durable queue and position persistence (sled)
//! - [`osm`] - OSM Notes API submission client
//! - [`mesh`] - Mesh transport seam (direct messages)
//! - [`geocode`] - Best-effort Nominatim reverse geocoding
//! - [`i18n`] - Message catalogs with locale fallback
//! - [`config`] - Configuration management and validation

pub mod config;
pub mod gateway;
pub mod geocode;
pub mod i18n;
pub mod logutil;
pub mod mesh;
pub mod osm;
pub mod storage;
