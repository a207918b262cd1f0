// Build script for generating the gRPC server code from the vendored protobuf files
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = "proto";
    let proto_path = format!("{}/mlagents_envs/communicator_objects", proto_dir);

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", proto_path);
    println!("cargo:rerun-if-env-changed=PROTOC");

    // Use a system protoc when one is configured, the bundled binary otherwise
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let protos = [
        format!("{}/unity_message.proto", proto_path),
        format!("{}/unity_input.proto", proto_path),
        format!("{}/unity_output.proto", proto_path),
        format!("{}/unity_rl_input.proto", proto_path),
        format!("{}/unity_rl_output.proto", proto_path),
        format!("{}/unity_rl_initialization_input.proto", proto_path),
        format!("{}/unity_rl_initialization_output.proto", proto_path),
        format!("{}/unity_to_external.proto", proto_path),
        format!("{}/brain_parameters.proto", proto_path),
        format!("{}/agent_info.proto", proto_path),
        format!("{}/agent_action.proto", proto_path),
        format!("{}/observation.proto", proto_path),
        format!("{}/command.proto", proto_path),
        format!("{}/header.proto", proto_path),
        format!("{}/capabilities.proto", proto_path),
    ];

    // Unity is the client; only the server side is needed
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile(&protos, &[proto_dir])?;

    Ok(())
}
