//! Process bootstrap: tracing and runtime installation.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kshim_core::{HostedRuntime, RuntimeError};

use crate::config::Config;

/// Startup errors.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Failed to install tracing subscriber: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),

    #[error("Failed to install runtime: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Initialize tracing with `filter`, falling back to "info" when the
/// directive does not parse.
pub fn init_tracing(filter: &str) -> Result<(), InitError> {
    let (env_filter, bad_filter) = match EnvFilter::try_new(filter) {
        Ok(f) => (f, false),
        Err(_) => (EnvFilter::new("info"), true),
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    if bad_filter {
        tracing::warn!(filter, "invalid log filter, using \"info\"");
    }
    Ok(())
}

/// Install the hosted runtime described by `config`.
///
/// Must run before the first helper call: the first query otherwise
/// installs a default runtime and this fails with
/// [`RuntimeError::AlreadyInstalled`].
pub fn install_runtime(config: &Config) -> Result<(), InitError> {
    let rt = HostedRuntime::new(config.runtime.online_cpus, config.runtime.page_limit)?;
    kshim_core::install(Box::new(rt))?;
    tracing::debug!(
        online_cpus = config.runtime.online_cpus,
        page_limit = ?config.runtime.page_limit,
        "hosted runtime ready"
    );
    Ok(())
}

/// Tracing first, then the runtime.
pub fn init(config: &Config) -> Result<(), InitError> {
    init_tracing(&config.log.filter)?;
    install_runtime(config)
}
