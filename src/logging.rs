
//! Logger configuration: stderr always, plus an optional log file with the same format.

use std::path::Path;

use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

const PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S)}] {h({l})}: {m}{n}";

/// Configure the global logger at `level`.
pub fn setup_logger(log_file: Option<&Path>, level: LevelFilter) -> anyhow::Result<()> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .target(Target::Stderr)
        .build();

    let mut config = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = log_file {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .build(path)?;

        config = config.appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("logfile", Box::new(logfile)),
        );
        root = root.appender("logfile");
    }

    let config = config.build(root.build(level))?;
    log4rs::init_config(config)?;

    Ok(())
}

/// Log level selected by the `--verbose` flag.
pub fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
