//! Logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
#[must_use]
pub fn default_filter(level: &str) -> String {
    format!("info,helix_simulator={level},hlx_sim={level}")
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `level`. Development builds log in a pretty format,
/// release builds log JSON.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
///
/// # Example
///
/// ```rust,no_run
/// # fn main() -> anyhow::Result<()> {
/// helix_simulator::observability::init("debug")?;
/// tracing::info!("simulator starting");
/// # Ok(())
/// # }
/// ```
pub fn init(level: &str) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    }

    Ok(())
}
