/// Builds the gRPC client and server code for the `farming.proto` definition
/// using `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`.
///
/// # Descriptor Set
///
/// A serialized `FileDescriptorSet` is written next to the generated code so
/// the server can expose gRPC reflection without shipping the `.proto` file.
///
/// # Files and Paths
///
/// - Proto file: `proto/farming.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust
/// pub mod farming {
///     tonic::include_proto!("farming");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("farming_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/farming.proto");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_with_config(config, &["proto/farming.proto"], &["proto"])
        .unwrap();
}
