//! Entry points compiled into the host.
//!
//! An addon archive whose `main` names one of these classes gets the
//! host-provided implementation instead of needing its own.

use chime_addon::{AddonContext, AddonError, AddonMain, EntryPoints, HookResult};

/// Logs its own lifecycle and makes sure the addon's data folder exists.
pub const CONSOLE_MAIN: &str = "chime.host.Console";

struct Console;

impl AddonMain for Console {
    fn on_start(&self, ctx: &AddonContext) -> HookResult {
        let folder = ctx.data_folder()?;
        tracing::info!(
            addon = %ctx.descriptor().name,
            data_folder = %folder.display(),
            "console addon attached"
        );
        Ok(())
    }

    fn on_stop(&self, ctx: &AddonContext) -> HookResult {
        tracing::info!(addon = %ctx.descriptor().name, "console addon detached");
        Ok(())
    }
}

/// Link every built-in entry point.
pub fn link(entry_points: &EntryPoints) -> Result<(), AddonError> {
    entry_points.register(CONSOLE_MAIN, |_ctx: &AddonContext| {
        Ok(Box::new(Console) as Box<dyn AddonMain>)
    })
}
