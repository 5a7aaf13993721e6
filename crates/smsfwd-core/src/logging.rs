use tracing_subscriber::{fmt, EnvFilter};

use crate::Result;

/// Initialize tracing for the relay.
///
/// Default: info for our crates, warn for the HTTP/Telegram stacks.
/// Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,smsfwd=info,smsfwd_core=info,smsfwd_source=info,smsfwd_telegram=info,{service_name}=info,teloxide=warn,reqwest=warn,hyper=warn"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("failed to install log subscriber: {e}")))?;

    Ok(())
}
