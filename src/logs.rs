use log::LevelFilter;
use log4rs::{
    append::{
        console::ConsoleAppender,
        rolling_file::{
            policy::compound::{roll::delete::DeleteRoller, trigger::size::SizeTrigger, CompoundPolicy},
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)(utc)} - {l}: {m}{n}";

/// Rotate the log file at 10 MB
const LOG_FILE_LIMIT: u64 = 10 * 1024 * 1024;

/// Console logging, plus a rolling file when `log_file` is set.
pub fn configure_logs(log_file: Option<&str>, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(console)));
    let mut root = Root::builder().appender("stdout");

    if let Some(path) = log_file {
        let file = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(
                path,
                Box::new(CompoundPolicy::new(
                    Box::new(SizeTrigger::new(LOG_FILE_LIMIT)),
                    Box::new(DeleteRoller::new()),
                )),
            )?;
        config = config.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    log4rs::init_config(config.build(root.build(level))?)?;
    Ok(())
}
