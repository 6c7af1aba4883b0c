/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Station coordination services.
//!
//! ```text
//! lib.rs
//! ├── proto/       – generated gRPC/protobuf types & stubs
//! ├── error        – ServiceError / ClientError and Status mapping
//! ├── client       – async service traits and lazily-connected gRPC clients
//! ├── cache        – key/value blackboard with per-key expiry
//! ├── event        – publish/subscribe with a persisted table and one delivery worker
//! ├── resources    – resource arbiter (claim registry)
//! ├── location     – best-source position over the cache
//! ├── config       – YAML service configuration
//! └── server       – per-service process wiring
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod location;
pub mod proto;
pub mod resources;
pub mod server;
