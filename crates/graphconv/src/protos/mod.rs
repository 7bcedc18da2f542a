mod onnx_inner {
    include!(concat!(env!("OUT_DIR"), "/onnx-protos/mod.rs"));
}

mod paddle_inner {
    include!(concat!(env!("OUT_DIR"), "/paddle-protos/mod.rs"));
}

/// Generated ONNX messages.
pub mod onnx {
    pub use super::onnx_inner::onnx::*;
}

/// Generated PaddlePaddle program description messages.
pub mod paddle {
    pub use super::paddle_inner::framework::*;
}
