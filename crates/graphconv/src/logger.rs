//! Console logging for the command line front.

use log::LevelFilter;
use log4rs::{
    Config,
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};

/// Errors raised while installing the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("invalid logger configuration: {0}")]
    Config(String),
    #[error(transparent)]
    SetLogger(#[from] log::SetLoggerError),
}

/// Logs to stderr, at debug level when `verbose`, info otherwise.
///
/// Panics are routed through the logger before the default hook runs.
pub fn init_log(verbose: bool) -> Result<(), LoggerError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{h({l})} - {f}:{L}] {m}{n}")))
        .build();
    let appender = Appender::builder().build("stderr", Box::new(stderr));

    let config = Config::builder()
        .appender(appender)
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|err| LoggerError::Config(err.to_string()))?;
    log4rs::init_config(config)?;
    update_panic_hook();

    Ok(())
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        hook(info);
    }));
}
