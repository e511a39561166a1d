//! # Beacon Client — delivery engine for workflow telemetry
//!
//! ## Purpose
//!
//! Streams pre-serialized telemetry frames to a collector over a persistent
//! WebSocket, tolerating connection loss, slow consumers, and clock skew.
//! This crate is the connection lifecycle and delivery-queue engine only:
//! façade calls such as `log` or `createWorkflow` live with the embedding
//! application, which builds envelopes with `beacon-wire` and hands them to
//! [`TelemetryClient::enqueue`].
//!
//! ## Architecture
//!
//! - [`transport`]: one [`transport::Transport`] session per (re)connect,
//!   opened by a [`transport::Connector`]; WebSocket in production, in-memory
//!   in tests.
//! - [`queue`]: strict-FIFO buffer of serialized frames.
//! - [`client`]: the controller driving connect → time-sync → ready →
//!   (heartbeat + drain) → teardown, with reconnect-on-failure.
//!
//! ## Delivery contract
//!
//! Frames are transmitted in enqueue order, at least once each: a frame is
//! only removed from the queue after a confirmed hand-off, so a send failure
//! leaves it at the head to be retried once the connection is re-established.
//! Public operations never block and never surface failures to the caller;
//! with no endpoint configured the whole engine is a silent no-op.

pub mod client;
pub mod config;
pub mod error;
pub mod queue;
pub mod transport;

pub use client::{ConnectionState, TelemetryClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use transport::{Connector, Transport, WsConnector};
