//! Named actions the surrounding build environment can trigger.
//!
//! The host starts from [`ActionTable::host_defaults`], whose `upload` entry
//! runs the linked image as a native process. That is wrong for a
//! cross-compiled RISC-V image, so [`install_flasher`] replaces the entry
//! outright with [`FlashUpload`]. The replaced action is handed back and
//! never called.

use std::collections::BTreeMap;

use crate::config::Layout;
use crate::error::BuildError;
use crate::process::{Invocation, ToolRunner};
use crate::upload::UploadDispatcher;

/// Name of the upload action.
pub const UPLOAD: &str = "upload";

/// What an action gets to work with.
pub struct ActionContext<'a> {
    /// Validated project layout.
    pub layout: &'a Layout,
    /// Runner for any external process the action starts.
    pub runner: &'a dyn ToolRunner,
}

/// A named, host-triggered operation. Returns a process status.
pub trait Action {
    /// One-line description for listings.
    fn description(&self) -> &str;

    /// Run the action to completion.
    fn run(&self, ctx: &ActionContext<'_>) -> Result<i32, BuildError>;
}

/// Capability table keyed by action name.
#[derive(Default)]
pub struct ActionTable {
    actions: BTreeMap<String, Box<dyn Action>>,
}

impl ActionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table a generic native host provides.
    pub fn host_defaults() -> Self {
        let mut table = Self::new();
        table.register(UPLOAD, Box::new(RunNative));
        table
    }

    /// Register `action` under `name`, replacing and returning any previous
    /// entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action: Box<dyn Action>,
    ) -> Option<Box<dyn Action>> {
        self.actions.insert(name.into(), action)
    }

    /// Look up an action.
    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.get(name).map(|action| &**action)
    }

    /// Registered names with their descriptions, sorted by name.
    pub fn describe(&self) -> impl Iterator<Item = (&str, &str)> {
        self.actions
            .iter()
            .map(|(name, action)| (name.as_str(), action.description()))
    }

    /// Run the action registered as `name`.
    pub fn run(&self, name: &str, ctx: &ActionContext<'_>) -> Result<i32, BuildError> {
        let action = self.get(name).ok_or_else(|| BuildError::UnknownAction {
            name: name.to_owned(),
        })?;
        tracing::debug!(action = name, "{}", action.description());
        action.run(ctx)
    }
}

/// Host default: execute the linked image on the build machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunNative;

impl Action for RunNative {
    fn description(&self) -> &str {
        "run the program on the host"
    }

    fn run(&self, ctx: &ActionContext<'_>) -> Result<i32, BuildError> {
        let inv = Invocation::new(ctx.layout.image_path());
        let output = ctx.runner.run_attached(&inv)?;
        Ok(output.status.unwrap_or(crate::upload::SIGNALLED_STATUS))
    }
}

/// Upload through the device flasher.
#[derive(Debug, Clone, Default)]
pub struct FlashUpload {
    env_port: Option<String>,
}

impl FlashUpload {
    /// `env_port` is the environment-provided fallback port.
    pub fn new(env_port: Option<String>) -> Self {
        Self { env_port }
    }
}

impl Action for FlashUpload {
    fn description(&self) -> &str {
        "flash the firmware image via flasher <PORT> <IMAGE>"
    }

    fn run(&self, ctx: &ActionContext<'_>) -> Result<i32, BuildError> {
        UploadDispatcher::new(ctx.layout, self.env_port.clone()).dispatch(ctx.runner)
    }
}

/// Replace the table's `upload` action with [`FlashUpload`]. Returns the
/// action that was replaced.
pub fn install_flasher(
    table: &mut ActionTable,
    env_port: Option<String>,
) -> Option<Box<dyn Action>> {
    let replaced = table.register(UPLOAD, Box::new(FlashUpload::new(env_port)));
    tracing::debug!("upload target overridden: flasher <PORT> <IMAGE>");
    replaced
}
