use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use graphconv::{ConversionError, ConversionRequest, InputOverride, convert, logger};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert ONNX and PaddlePaddle models into the graphconv IR", long_about = None)]
struct Cli {
    /// Path to an ONNX model or a serialized Paddle program (.pdmodel).
    model: PathBuf,
    /// Input override as `NAME[2,?,4]:f32`; the name, shape and type parts are each optional.
    #[arg(long = "input", short = 'i')]
    inputs: Vec<InputOverride>,
    /// Tensor to keep as a result, in order. Defaults to the model's outputs.
    #[arg(long = "output", short = 'o')]
    outputs: Vec<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Log debug details to stderr.
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("failed to serialize the graph: {0}")]
    Json(#[from] serde_json::Error),
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut request = ConversionRequest::new(cli.model);
    request.inputs = cli.inputs;
    request.outputs = cli.outputs;

    let graph = convert(request)?;
    match cli.format {
        OutputFormat::Text => print!("{graph}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&graph)?),
    }
    for diagnostic in graph.diagnostics() {
        log::warn!("{diagnostic}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logger::init_log(cli.verbose) {
        eprintln!("{err}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
