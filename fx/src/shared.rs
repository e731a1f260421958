//! Process-wide engine instance.
//!
//! Library code should take an [`ExchangeRateConversion`] by reference.
//! This accessor exists for the outermost composition point of a process.

use std::sync::{Arc, OnceLock};

use crate::config::EnvConfigSource;
use crate::engine::ExchangeRateConversion;
use crate::settings::FxEngineConfig;

static SHARED: OnceLock<Arc<ExchangeRateConversion>> = OnceLock::new();

/// Install `engine` as the shared instance.
///
/// Fails with the rejected engine if a shared instance already exists.
pub fn install(
    engine: ExchangeRateConversion,
) -> Result<Arc<ExchangeRateConversion>, Arc<ExchangeRateConversion>> {
    let engine = Arc::new(engine);
    SHARED.set(Arc::clone(&engine))?;
    Ok(engine)
}

/// Shared engine instance, created from the environment on first access.
///
/// If the instance was created before any configuration was available, its
/// configuration is resolved again on every access until it is not empty.
pub fn get_instance() -> Arc<ExchangeRateConversion> {
    let mut created = false;
    let instance = SHARED.get_or_init(|| {
        created = true;
        Arc::new(ExchangeRateConversion::new(
            FxEngineConfig::from_env(),
            Arc::new(EnvConfigSource),
            Vec::new(),
        ))
    });

    if !created && instance.effective_config().is_empty() {
        instance.init_config();
    }

    Arc::clone(instance)
}
