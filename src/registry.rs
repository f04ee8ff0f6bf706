//! Name-indexed ownership of every service in a plan.

use crate::error::BootError;
use crate::service::Service;
use crate::types::ServiceName;
use std::collections::HashMap;

/// Services in load order (level by level), addressable by name.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<Service>,
    index: HashMap<ServiceName, usize>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: Service) -> Result<(), BootError> {
        if self.index.contains_key(service.name()) {
            return Err(BootError::config(format!(
                "Duplicate service name '{}'",
                service.name()
            )));
        }
        self.index
            .insert(service.name().clone(), self.services.len());
        self.services.push(service);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.index.get(name).map(|&i| &mut self.services[i])
    }

    pub fn get_or_error(&self, name: &str) -> Result<&Service, BootError> {
        self.get(name)
            .ok_or_else(|| BootError::usage(format!("Unknown service '{}'", name)))
    }

    pub fn get_mut_or_error(&mut self, name: &str) -> Result<&mut Service, BootError> {
        self.get_mut(name)
            .ok_or_else(|| BootError::usage(format!("Unknown service '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
