//! `graphconv` converts ONNX and PaddlePaddle models into the canonical graph IR of
//! [`graphconv_ir`].
//!
//! A [`ConversionRequest`] names the model and, optionally, input overrides,
//! example inputs and the outputs to keep. [`convert`] runs it through four stages:
//!
//! 1. a [front-end](frontend) reads the source into a [`ForeignGraph`];
//! 2. [`infer`] assigns a type to every tensor;
//! 3. the [mapper] rewrites every foreign operator into canonical nodes;
//! 4. the graph builder checks and assembles the final [`IrGraph`](graphconv_ir::IrGraph).
//!
//! Every failure is a [`ConversionError`] tagged with the stage that raised it.

mod error;
mod foreign;
mod infer;
mod pipeline;
mod request;

pub mod frontend;
pub mod logger;
pub mod mapper;
pub mod protos;

pub use error::*;
pub use foreign::*;
pub use infer::*;
pub use pipeline::*;
pub use request::*;

pub use graphconv_ir;
