//! Address registry.
//!
//! Tracks which node label owns each assigned address so that a run never
//! hands the same address to two different nodes.

use super::error::PlanError;
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Default)]
pub struct AddressRegistry {
    /// Address -> owning node label
    assigned: HashMap<IpAddr, String>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `address` for `label`. Re-registering the same pair is allowed.
    pub fn register(&mut self, address: IpAddr, label: &str) -> Result<(), PlanError> {
        match self.assigned.get(&address) {
            Some(owner) if owner != label => Err(PlanError::DuplicateAddress {
                address,
                label: label.to_string(),
                owner: owner.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.assigned.insert(address, label.to_string());
                Ok(())
            }
        }
    }

    pub fn owner_of(&self, address: &IpAddr) -> Option<&str> {
        self.assigned.get(address).map(String::as_str)
    }

    pub fn is_assigned(&self, address: &IpAddr) -> bool {
        self.assigned.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
