fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc binary so the build does not depend on a
    // system-installed protobuf compiler being present.
    if std::env::var_os("PROTOC").is_none() {
        // SAFETY: the build script is single-threaded at this point.
        unsafe {
            std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
        }
    }
    tonic_build::compile_protos("proto/mesh.proto")?;
    Ok(())
}
