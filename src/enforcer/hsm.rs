//! Access to key material.
//!
//! The enforcer never sees key bytes. It asks a key material service for
//! new keys and refers to them by their locator afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::EnforcerError;
use super::key::Repository;

//------------ KeyMaterial ---------------------------------------------------

/// The result of looking up a locator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyLookup {
    Exists,
    NotFound,
}

/// A service that creates and destroys key material.
pub trait KeyMaterial {
    /// Creates a new key in the repository and returns its locator.
    fn generate_key(
        &mut self,
        repository: &Repository,
        algorithm: u8,
        bits: u16,
    ) -> Result<String, EnforcerError>;

    fn delete_key(&mut self, locator: &str) -> Result<(), EnforcerError>;

    fn find_key(&self, locator: &str) -> Result<KeyLookup, EnforcerError>;

    /// Number of keys currently stored in the repository.
    fn repository_key_count(&self, repository: &Repository) -> Result<u64, EnforcerError>;
}

//------------ SoftHsm -------------------------------------------------------

/// A key material service that only keeps track of locators.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct SoftHsm {
    keys: BTreeMap<String, SoftKey>,
    serial: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
struct SoftKey {
    repository: String,
    algorithm: u8,
    bits: u16,
}

impl SoftHsm {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyMaterial for SoftHsm {
    fn generate_key(
        &mut self,
        repository: &Repository,
        algorithm: u8,
        bits: u16,
    ) -> Result<String, EnforcerError> {
        if let Some(capacity) = repository.capacity {
            if self.repository_key_count(repository)? >= capacity {
                return Err(EnforcerError::KeyMaterial(format!(
                    "repository {} is full ({capacity} keys)",
                    repository.name
                )));
            }
        }
        self.serial += 1;
        let locator = format!("{:032x}", self.serial);
        debug!("generated key {locator} in repository {}", repository.name);
        self.keys.insert(
            locator.clone(),
            SoftKey {
                repository: repository.name.clone(),
                algorithm,
                bits,
            },
        );
        Ok(locator)
    }

    fn delete_key(&mut self, locator: &str) -> Result<(), EnforcerError> {
        match self.keys.remove(locator) {
            Some(_) => Ok(()),
            None => Err(EnforcerError::KeyMaterial(format!(
                "key {locator} not found"
            ))),
        }
    }

    fn find_key(&self, locator: &str) -> Result<KeyLookup, EnforcerError> {
        Ok(if self.keys.contains_key(locator) {
            KeyLookup::Exists
        } else {
            KeyLookup::NotFound
        })
    }

    fn repository_key_count(&self, repository: &Repository) -> Result<u64, EnforcerError> {
        Ok(self
            .keys
            .values()
            .filter(|key| key.repository == repository.name)
            .count() as u64)
    }
}
