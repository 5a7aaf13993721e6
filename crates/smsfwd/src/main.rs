use std::sync::Arc;

use smsfwd_core::{config::Config, source::SourceClient};
use smsfwd_source::HttpSourceClient;

#[tokio::main]
async fn main() -> Result<(), smsfwd_core::Error> {
    smsfwd_core::logging::init("smsfwd")?;

    let cfg = Arc::new(Config::load()?);

    let source: Arc<dyn SourceClient> = Arc::new(HttpSourceClient::new(
        cfg.sms_api_base.clone(),
        cfg.source_timeout,
    )?);

    smsfwd_telegram::router::run_polling(cfg, source)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "telegram bot failed");
            smsfwd_core::Error::External(format!("telegram bot failed: {e}"))
        })?;

    Ok(())
}
