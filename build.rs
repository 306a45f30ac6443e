// Compiles the ops plane gRPC client from proto/clusterops.proto.
//
// Mirrors the prost_build::compile_protos call in
// src/modules/multi_cluster_orchestrator/build.rs, extended to tonic_build
// because this crate needs a generated client stub, not just message types.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/clusterops.proto");

    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile(&["proto/clusterops.proto"], &["proto/"])?;

    Ok(())
}
