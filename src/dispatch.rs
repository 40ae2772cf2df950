//! Hands a parsed invocation to the execution engine.

use anyhow::Result;
use log::{debug, info};

use crate::{
    config::Config,
    context::create_context,
    engine::{BackupSettings, Engine, EngineParams, RsyncBackup},
    options::Invocation,
};

/// Runs the backup described by `invocation` once.
pub fn run(invocation: Invocation, config: &Config) -> Result<()> {
    run_with(invocation, config, |params| Box::new(RsyncBackup::new(params)))
}

/// Like [`run`], with the engine built by `factory`.
pub fn run_with<F>(invocation: Invocation, config: &Config, factory: F) -> Result<()>
where
    F: FnOnce(EngineParams) -> Box<dyn Engine>,
{
    let Invocation {
        options,
        destination,
        context,
        ..
    } = invocation;

    if options.actions.is_undefined() {
        debug!("No explicit action given, running backup, snapshot and rotate.");
    }

    let settings = BackupSettings::merge(&options, config);
    debug!("Effective settings: {settings:?}");

    let source_context = create_context(&context);
    info!("Backing up the {}.", source_context.describe());

    let source = options
        .source
        .unwrap_or_else(|| config.backup.source.clone());

    let mut engine = factory(EngineParams {
        source,
        source_context,
        actions: options.actions,
        destination,
        settings,
    });
    engine.execute()
}
