//! Level and service transition callbacks.

use crate::types::{Action, RunId, ServiceName};
use std::fmt;

pub type LevelCallback = Box<dyn FnMut(&RunId, Action, usize)>;
pub type ServiceCallback = Box<dyn FnMut(&ServiceName, Action, &str)>;

/// Caller-supplied observers, owned by the scheduler for the plan's lifetime.
#[derive(Default)]
pub struct BootHooks {
    level: Option<LevelCallback>,
    service: Option<ServiceCallback>,
}

impl BootHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_level(mut self, callback: impl FnMut(&RunId, Action, usize) + 'static) -> Self {
        self.level = Some(Box::new(callback));
        self
    }

    pub fn on_service(
        mut self,
        callback: impl FnMut(&ServiceName, Action, &str) + 'static,
    ) -> Self {
        self.service = Some(Box::new(callback));
        self
    }

    pub(crate) fn level(&mut self, run_id: &RunId, action: Action, level_index: usize) {
        tracing::debug!(run_id = %run_id, level = level_index, action = %action, "level transition");
        if let Some(callback) = self.level.as_mut() {
            callback(run_id, action, level_index);
        }
    }

    pub(crate) fn service(&mut self, service: &ServiceName, action: Action, message: &str) {
        tracing::debug!(service = %service, action = %action, message, "service transition");
        if let Some(callback) = self.service.as_mut() {
            callback(service, action, message);
        }
    }
}

impl fmt::Debug for BootHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootHooks")
            .field("level", &self.level.is_some())
            .field("service", &self.service.is_some())
            .finish()
    }
}
