use std::sync::Arc;

use crate::core::{
    controller::Controller,
    route::{ConfigError, FailoverConfig},
    signal::{FailoverSignal, SignalError},
    store::RouteHandle,
};

/// Failover flag relayed to an application supplied callback.
#[derive(Debug, Clone)]
pub struct Failover {
    handle: RouteHandle,
    config: FailoverConfig,
}

impl Failover {
    pub(crate) fn new(handle: RouteHandle, config: FailoverConfig) -> Self {
        Self { handle, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Notify the callback with this route's name and `failover`.
    pub fn invoke(&self, failover: bool) {
        if let Some(invoke) = &self.config.invoke {
            invoke(self.handle.key(), failover);
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.config.invoke.is_none() {
            return Err(ConfigError::MissingFailoverInvoke(
                self.handle.key().to_string(),
            ));
        }
        Ok(())
    }

    pub fn enable(&self) -> Option<Arc<Controller>> {
        self.set_enabled(true)
    }

    pub fn disable(&self) -> Option<Arc<Controller>> {
        self.set_enabled(false)
    }

    fn set_enabled(&self, enabled: bool) -> Option<Arc<Controller>> {
        if self.config.enabled == enabled {
            return None;
        }
        self.handle.publish(|ctrl| {
            ctrl.failover
                .as_mut()
                .is_some_and(|f| std::mem::replace(&mut f.config.enabled, enabled) != enabled)
        })
    }

    pub fn signal(&self, signal: &FailoverSignal) -> Result<(), SignalError> {
        match signal.enabled {
            Some(true) => self.enable(),
            Some(false) => self.disable(),
            None => None,
        };
        Ok(())
    }
}
