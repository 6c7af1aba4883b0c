/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the station services.
//!
//! Two error enums model the two sides of every RPC:
//!
//! * [`ServiceError`]: why a request failed inside a service (missing key,
//!   unknown event, undecodable payload, persistence failure).  Converted to
//!   a [`tonic::Status`] at the gRPC boundary.
//! * [`ClientError`]: why a remote call failed from the caller's point of
//!   view.  Callers treat every variant as transient: log it and try again
//!   on the next natural tick.

use std::path::PathBuf;

use thiserror::Error;
use tonic::{Code, Status};

// ── Service side ──────────────────────────────────────────────────────────────

/// Failure raised by a service handler.
///
/// | Variant | gRPC status |
/// |---|---|
/// | `KeyNotFound` | `NotFound` |
/// | `EventNotFound` | `NotFound` |
/// | `InvalidPayload` | `InvalidArgument` |
/// | `InvalidTimeout` | `InvalidArgument` |
/// | `InvalidSubscription` | `InvalidArgument` |
/// | `Persist` | `Internal` |
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `get`/`get_age` on a key that is not in the cache.
    #[error("no cache entry for key '{0}'")]
    KeyNotFound(String),

    /// `listObservers` on an event nobody subscribed to.
    #[error("no observers registered for event '{0}'")]
    EventNotFound(String),

    /// A JSON payload could not be decoded.
    #[error("invalid JSON payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A timeout that is negative or not finite.
    #[error("invalid timeout {seconds} for key '{key}'")]
    InvalidTimeout { key: String, seconds: f64 },

    /// A subscription field that is empty or contains whitespace cannot be
    /// stored as one field of a table record.
    #[error("invalid subscription {field} '{value}': must be non-empty without whitespace")]
    InvalidSubscription { field: &'static str, value: String },

    /// The subscription table file could not be read or written.
    #[error("subscription table I/O failed at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        let code = match &err {
            ServiceError::KeyNotFound(_) | ServiceError::EventNotFound(_) => Code::NotFound,
            ServiceError::InvalidPayload(_)
            | ServiceError::InvalidTimeout { .. }
            | ServiceError::InvalidSubscription { .. } => Code::InvalidArgument,
            ServiceError::Persist { .. } => Code::Internal,
        };
        Status::new(code, err.to_string())
    }
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Failure of a remote call as seen by the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service URL could not be parsed into an endpoint.
    #[error("invalid service URL '{0}'")]
    InvalidUrl(String),

    /// Connection could not be established.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The service answered with a non-OK status (includes timeouts and
    /// connection refusals surfaced by the channel).
    #[error("remote call failed: {0}")]
    Status(#[from] Status),

    /// The reply carried JSON we could not decode, or a value we could not
    /// encode for sending.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns `true` if the service reported that the key/event does not
    /// exist (as opposed to being unreachable).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Status(status) if status.code() == Code::NotFound)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
