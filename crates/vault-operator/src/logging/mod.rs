use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::MakeWriter,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse default log filter"))]
    DefaultFilter {
        source: tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Format of the log lines written to stderr and the log file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Plain,

    /// One JSON object per line.
    Json,
}

/// Initializes `tracing` logging with options from the environment variable
/// given in the `env` parameter.
///
/// We force callers to provide a variable name so it can differ per binary,
/// e.g. `VAULT_RESOLVER_LOG`. If the variable is not set, the maximum log
/// level is INFO.
///
/// Logs go to stderr, stdout is left to the output of the binary.
///
/// Log output can be copied to a file by setting `{env}_DIRECTORY` (e.g.
/// `VAULT_RESOLVER_LOG_DIRECTORY`) to a directory path. This file is rotated
/// regularly.
pub fn initialize_logging(env: &str, app_name: &str, format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_env(env) {
        Ok(env_filter) => env_filter,
        _ => EnvFilter::try_new(tracing::Level::INFO.to_string()).context(DefaultFilterSnafu)?,
    };

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = file_appender_directory
        .as_deref()
        .map(|directory| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(directory)
                .context(InitFileAppenderSnafu { directory })
        })
        .transpose()?;

    let mut layers = vec![fmt_layer(std::io::stderr, format, true)];
    if let Some(file_appender) = file_appender {
        layers.push(fmt_layer(file_appender, format, false));
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// A fmt layer writing lines in `format` to `writer`.
fn fmt_layer<W>(writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer);

    match format {
        LogFormat::Plain => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        sync::{Arc, Mutex},
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn lines(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock is not poisoned").clone())
                .expect("log output is UTF-8")
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock is not poisoned").write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured(format: LogFormat) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = Registry::default().with(fmt_layer(move || writer.clone(), format, false));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(vault.name = "vault", "resolving Vault");
        });

        captured.lines()
    }

    #[test]
    fn plain_lines() {
        let lines = captured(LogFormat::Plain);
        assert!(lines.contains("INFO"), "{lines}");
        assert!(lines.contains("resolving Vault vault.name=\"vault\""), "{lines}");
    }

    #[test]
    fn json_lines() {
        let lines = captured(LogFormat::Json);
        let line: serde_json::Value =
            serde_json::from_str(lines.trim_end()).expect("one JSON object per line");
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["fields"]["message"], "resolving Vault");
        assert_eq!(line["fields"]["vault.name"], "vault");
    }

    // The global subscriber can only be installed once per process, this
    // only checks that the default level is accepted.
    #[test]
    fn default_logging_is_initialized() {
        initialize_logging("VAULT_OPERATOR_TEST_NOT_SET", "test", LogFormat::Plain)
            .expect("logging can be initialized");

        tracing::error!("ERROR level messages should be seen.");
        tracing::info!("INFO level messages should also be seen by default.");
        tracing::debug!("DEBUG level messages should only be seen with VAULT_OPERATOR_TEST_NOT_SET=debug.");
    }
}
