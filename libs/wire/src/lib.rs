//! # Beacon Wire Protocol
//!
//! Shared definitions for the JSON frames exchanged between a Beacon client
//! and a collector. Every frame is an envelope of the form
//! `{"action": <string>, "payload": <object>}`, carried as a UTF-8 text
//! frame over the transport.
//!
//! This crate is deliberately passive: it knows how to build and encode
//! envelopes and how to read the `action` discriminator off inbound frames,
//! but it performs no I/O. The delivery engine lives in `beacon-client`.

pub mod clock;
pub mod envelope;

pub use envelope::{
    BodyType, CreateWorkflowPayload, EndWorkflowPayload, Envelope, HeartbeatPayload, LogPayload,
    TimeSyncPayload,
};
