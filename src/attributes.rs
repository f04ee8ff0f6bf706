//! Attribute bag: write-once values each service exposes to later levels.
//!
//! Entries are keyed by producing service. A producer's values become readable
//! only once the producer is `Ready`; before that a read reports
//! "not ready", and after a failure it reports "failed". Neither condition is
//! fatal to the plan.

use crate::error::BootError;
use crate::types::ServiceName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub type AttrValue = serde_json::Value;
pub type Attributes = BTreeMap<String, AttrValue>;

/// Readability of one producer's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerState {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
struct ProducerEntry {
    state: ProducerState,
    values: Attributes,
}

#[derive(Debug, Default)]
pub struct AttributeBag {
    producers: HashMap<ServiceName, ProducerEntry>,
}

impl AttributeBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a producer. Registering twice keeps existing values.
    pub fn register(&mut self, service: ServiceName) {
        self.producers.entry(service).or_insert(ProducerEntry {
            state: ProducerState::Pending,
            values: Attributes::new(),
        });
    }

    /// Reinstate a producer's entry from persisted state.
    pub fn restore(&mut self, service: ServiceName, state: ProducerState, values: Attributes) {
        self.producers
            .insert(service, ProducerEntry { state, values });
    }

    pub fn read(&self, service: &str, key: &str) -> Result<&AttrValue, BootError> {
        let (name, entry) = self.producers.get_key_value(service).ok_or_else(|| {
            BootError::config(format!("Unknown service '{}' in attribute lookup", service))
        })?;
        match entry.state {
            ProducerState::Pending => Err(BootError::DependencyNotReady {
                service: name.clone(),
                key: key.to_string(),
            }),
            ProducerState::Failed => Err(BootError::DependencyFailed {
                service: name.clone(),
                key: key.to_string(),
            }),
            ProducerState::Ready => entry.values.get(key).ok_or_else(|| {
                BootError::config(format!(
                    "Service '{}' does not provide attribute '{}'",
                    service, key
                ))
            }),
        }
    }

    /// Write a batch of attributes for `service`.
    ///
    /// Every key is checked before anything is inserted, so a conflicting
    /// batch leaves the bag unchanged.
    pub fn write(&mut self, service: &ServiceName, values: Attributes) -> Result<(), BootError> {
        let entry = self.producers.get_mut(service).ok_or_else(|| {
            BootError::config(format!("Unknown service '{}' in attribute write", service))
        })?;
        if let Some(existing) = values.keys().find(|key| entry.values.contains_key(*key)) {
            return Err(BootError::AttributeConflict {
                service: service.clone(),
                key: existing.clone(),
            });
        }
        entry.values.extend(values);
        Ok(())
    }

    pub fn set_state(&mut self, service: &ServiceName, state: ProducerState) {
        if let Some(entry) = self.producers.get_mut(service) {
            entry.state = state;
        }
    }

    pub fn state(&self, service: &str) -> Option<ProducerState> {
        self.producers.get(service).map(|entry| entry.state)
    }

    /// Values written so far, regardless of readability.
    pub fn values(&self, service: &str) -> Option<&Attributes> {
        self.producers.get(service).map(|entry| &entry.values)
    }
}
