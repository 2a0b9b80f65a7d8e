//! The attach sequence.

use std::sync::Arc;

use crate::{
    hierarchy::{ClassSource, TargetType},
    instrument::{retransform_all, Config, Logger, RetransformTally, Runtime, Transformer},
    Result,
};

/// What [`attach`] set up.
#[derive(Debug, Clone)]
pub struct AttachReport {
    /// The active configuration
    pub config: Config,
    /// Outcome of the retroactive pass
    pub tally: RetransformTally,
}

/// Configure the instrument, install the hook and run the retroactive pass.
///
/// The monitored type is resolved from `source` before anything is installed; `is_set` tells
/// which environment variables are present.
///
/// # Errors
/// Returns [`crate::Error::Configuration`] if the monitored type cannot be resolved, which the
/// caller must treat as fatal, and the runtime's error if the hook cannot be installed or the
/// loaded classes cannot be enumerated.
pub fn attach<R: Runtime + ?Sized>(
    runtime: &R,
    source: &dyn ClassSource,
    argument: Option<&str>,
    is_set: &dyn Fn(&str) -> bool,
    logger: Logger,
) -> Result<AttachReport> {
    let config = Config::from_lookup(argument, is_set);
    config.log_summary(&logger);

    let target = TargetType::resolve(source)?;
    log::debug!("Monitoring {} and its subtypes", target.name());

    let transformer = Transformer::new(config.clone(), Some(Arc::new(target)), logger.clone());
    runtime.install_hook(Arc::new(transformer))?;

    let tally = retransform_all(runtime, &logger)?;
    Ok(AttachReport { config, tally })
}
