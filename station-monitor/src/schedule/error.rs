/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors raised while loading schedule files.
//!
//! None of these abort a reload: a file that fails to read or parse is
//! skipped, and so is a single schedule with an invalid field.  The
//! remaining schedules still load.

use std::path::PathBuf;

use thiserror::Error;

use crate::lookup::LookupError;

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A schedule file pattern is not a valid glob.
    #[error("invalid schedule file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("cannot read schedule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse schedule file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The file is valid YAML but not a mapping of name → fields.
    #[error("schedule file {path} must map schedule names to field mappings")]
    Layout { path: PathBuf },

    #[error("schedule '{schedule}': {source}")]
    Field {
        schedule: String,
        #[source]
        source: LookupError,
    },

    #[error("schedule '{schedule}': invalid {field}: {reason}")]
    Invalid {
        schedule: String,
        field: &'static str,
        reason: String,
    },
}
