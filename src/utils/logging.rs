use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Parsers and the HTTP stack are chatty at debug level
const QUIET_CRATES: &[&str] = &["html5ever=warn", "selectors=warn", "hyper=warn", "reqwest=warn"];

fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { "debug" } else { "info" };

    let mut filter = EnvFilter::from_default_env()
        .add_directive("warn".parse()?)
        .add_directive(format!("forum_harvester={}", level).parse()?)
        .add_directive(format!("harvester={}", level).parse()?);

    for directive in QUIET_CRATES {
        filter = filter.add_directive(directive.parse()?);
    }

    Ok(filter)
}

/// Initialize console logging, mirrored to `log_file` when given.
/// The file is appended to so resumed runs keep one history.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_target(verbose)
        .with_span_events(FmtSpan::CLOSE);

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create log directory: {}", parent.display()))?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(format!("Failed to open log file: {}", path.display()))?;

            Some(fmt::layer().with_target(true).with_ansi(false).with_writer(file))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(verbose)?)
        .with(console)
        .with(file_layer)
        .init();

    Ok(())
}

/// Default log file under the platform data directory
pub fn default_log_file() -> PathBuf {
    let mut path = directories::ProjectDirs::from("org", "forum-harvester", "forum-harvester")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./logs"));

    path.push("harvester.log");
    path
}
