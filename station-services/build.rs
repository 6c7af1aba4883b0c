/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

/// Build script – compiles protobuf definitions into Rust source code.
///
/// tonic-build wraps prost-build and additionally generates tonic server/client
/// stubs.  The generated files are written to `OUT_DIR` (managed by Cargo) and
/// pulled into the crate via `tonic::include_proto!` in `src/proto/mod.rs`.
///
/// Prerequisites
/// -------------
/// `protoc` is taken from the `PROTOC` environment variable when set,
/// otherwise the binary bundled by `protoc-bin-vendored` is used.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "proto";
    let proto_file = format!("{}/station.proto", proto_root);

    // Tell Cargo to re-run this build script when the proto file changes
    println!("cargo:rerun-if-changed={}", proto_file);
    println!("cargo:rerun-if-env-changed=PROTOC");

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        // Every service is both served here and called by monitors/tools
        .build_server(true)
        .build_client(true)
        // Derive serde Serialize/Deserialize on every generated message so we can
        // (de)serialise them easily in tests and logging.
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(
            &[proto_file.as_str()], // proto files to compile
            &[proto_root],          // directories to search for imports
        )?;

    Ok(())
}
