/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

/// Proto-generated modules.
///
/// `tonic::include_proto!` expands to an `include!` of the file that
/// prost/tonic-build wrote into `OUT_DIR` during the build script.
pub mod station_v1 {
    // Package name declared in station.proto is `station.v1`.
    tonic::include_proto!("station.v1");
}
