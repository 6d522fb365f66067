fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the bundled protoc when none is configured
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    println!("cargo:rerun-if-changed=proto/table_exchange.proto");

    tonic_prost_build::configure()
        .build_server(false) // Client only, no server code generation
        .build_transport(false) // Don't generate transport code (avoid naming conflicts)
        .compile_protos(&["proto/table_exchange.proto"], &["proto"])?;

    Ok(())
}
