//! Tracing configuration and initialization.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Environment variable read for the log filter before falling back to `RUST_LOG`.
const LOG_ENV: &str = "PRELOAD_FS_LOG";

/// Output style of the subscriber.
enum TrcMode {
    /// Plain fmt lines with span enter/close events.
    Plain,
    /// Compact lines routed through indicatif so active spans render as spinners.
    Spinners,
}

pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
}

impl Default for Trc {
    fn default() -> Self {
        let maybe_env_filter =
            EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            // A user who sets a filter is debugging, so skip the spinners.
            Ok(env_filter) => Self {
                mode: TrcMode::Plain,
                env_filter,
            },
            Err(_) => Self {
                mode: TrcMode::Spinners,
                env_filter: EnvFilter::new("info"),
            },
        }
    }
}

impl Trc {
    /// Force plain output, e.g. when stdout is piped into another program.
    pub fn plain(mut self) -> Self {
        self.mode = TrcMode::Plain;
        self
    }

    pub fn init(self) -> Result<(), TryInitError> {
        match self.mode {
            TrcMode::Plain => self.init_plain(),
            TrcMode::Spinners => self.init_spinners(),
        }
    }

    fn init_plain(self) -> Result<(), TryInitError> {
        tracing_subscriber::fmt()
            .with_env_filter(self.env_filter)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .finish()
            .try_init()
    }

    fn init_spinners(self) -> Result<(), TryInitError> {
        let indicatif_layer = IndicatifLayer::new();
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(indicatif_layer.get_stderr_writer())
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .with(indicatif_layer)
            .try_init()
    }
}
