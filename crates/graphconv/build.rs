fn main() {
    // Generate the onnx protobuf files
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["src/protos"])
        .input("src/protos/onnx.proto")
        .cargo_out_dir("onnx-protos")
        .run_from_script();

    // Generate the paddle program description files
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["src/protos"])
        .input("src/protos/framework.proto")
        .cargo_out_dir("paddle-protos")
        .run_from_script();
}
