// Build script to regenerate the Protocol Buffer bindings.
//
// The generated code is checked in under `src/generated` so that a normal
// build does not need `protoc`. Set `PROTO_GEN_REGENERATE=1` after editing
// `proto/auth.proto` to rewrite it.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=PROTO_GEN_REGENERATE");
    println!("cargo:rerun-if-changed=../../proto/auth.proto");

    if std::env::var_os("PROTO_GEN_REGENERATE").is_none() {
        return Ok(());
    }

    tonic_build::configure()
        .out_dir("src/generated")
        .compile_protos(&["../../proto/auth.proto"], &["../../proto/"])?;

    Ok(())
}
