//! Build script for frozen2onnx
//!
//! Generates Rust code from the ONNX protobuf definitions using prost-build.

use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_path = PathBuf::from("proto/onnx.proto");

    if !proto_path.exists() {
        return Err(format!("ONNX proto file not found at: {}", proto_path.display()).into());
    }

    // A protoc from the environment wins over the bundled one
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let mut config = prost_build::Config::new();
    config.btree_map(["."]);
    config.out_dir(&out_dir);
    config.compile_protos(&[&proto_path], &["proto/"])?;

    println!("cargo:rerun-if-changed=proto/onnx.proto");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PROTOC");

    Ok(())
}
