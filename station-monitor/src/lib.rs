/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-instrument scheduling and control.
//!
//! ```text
//! lib.rs
//! ├── duration     – YAML durations (seconds or humantime)
//! ├── lookup       – ordered option scopes (schedule → instrument → defaults)
//! ├── schedule/    – schedule files, matching and reload
//! ├── solar        – solar ephemeris boundary and NOAA approximation
//! ├── latch        – edge-triggered reporting
//! ├── window       – window predicates (periodic, solar, night, power)
//! ├── cadence      – sample cadence selectors
//! ├── claims       – resource claim set mirrored to the arbiter
//! ├── lockfile     – PID lock files with stale-owner takeover
//! ├── output       – sample files and archiving
//! ├── machine      – InstrumentStateMachine and the Instrument hooks
//! ├── pdu          – staged rail sequencing and the PDU instrument
//! ├── script       – command-driven instrument
//! └── config       – YAML monitor configuration
//! ```

pub mod cadence;
pub mod claims;
pub mod config;
pub mod duration;
pub mod latch;
pub mod lockfile;
pub mod lookup;
pub mod machine;
pub mod output;
pub mod pdu;
pub mod schedule;
pub mod script;
pub mod solar;
pub mod window;
