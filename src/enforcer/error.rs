//! Errors and warnings of the enforcement engine.

use std::{error, fmt};

use super::key::{KeyState, KeyType};

//------------ EnforcerError -------------------------------------------------

/// An error that ends an enforcement operation.
///
/// When returned from within a transaction, the transaction is rolled back
/// and none of the changes made so far are visible.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EnforcerError {
    PolicyNotFound(u64),
    ParameterLoadFailed { policy_id: u64, reason: String },
    ZoneNotFound(String),
    RepositoryNotFound(String),
    KeyNotFound { keypair_id: u64, zone: String },

    /// The storage backend failed.
    Storage(String),

    /// The key material service failed.
    KeyMaterial(String),

    /// Fewer keys are waiting in Generate than need promoting.
    InsufficientGeneratedKeys {
        keytype: KeyType,
        needed: usize,
        available: usize,
    },

    /// Keys that must be backed up first were about to become active.
    BackupRequired { keytype: KeyType, keys: Vec<u64> },

    InvalidKeyType(KeyType),
    InvalidStateTransition {
        keytype: KeyType,
        from: KeyState,
        to: KeyState,
    },
    UnknownKeyState { keypair_id: u64, code: i64 },
}

impl fmt::Display for EnforcerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcerError::PolicyNotFound(id) => write!(f, "policy {id} not found"),
            EnforcerError::ParameterLoadFailed { policy_id, reason } => {
                write!(f, "unable to load parameters of policy {policy_id}: {reason}")
            }
            EnforcerError::ZoneNotFound(zone) => write!(f, "zone {zone} not found"),
            EnforcerError::RepositoryNotFound(name) => {
                write!(f, "repository {name} not found")
            }
            EnforcerError::KeyNotFound { keypair_id, zone } => {
                write!(f, "key {keypair_id} not found in zone {zone}")
            }
            EnforcerError::Storage(reason) => write!(f, "storage failure: {reason}"),
            EnforcerError::KeyMaterial(reason) => write!(f, "key repository failure: {reason}"),
            EnforcerError::InsufficientGeneratedKeys {
                keytype,
                needed,
                available,
            } => write!(
                f,
                "not enough generated {keytype}s: need {needed}, have {available}"
            ),
            EnforcerError::BackupRequired { keytype, keys } => {
                write!(f, "{keytype} ")?;
                write_ids(f, keys)?;
                write!(f, " must be backed up before becoming active")
            }
            EnforcerError::InvalidKeyType(keytype) => {
                write!(f, "key type {keytype} is not handled by the enforcer")
            }
            EnforcerError::InvalidStateTransition { keytype, from, to } => {
                write!(f, "invalid {keytype} transition from {from} to {to}")
            }
            EnforcerError::UnknownKeyState { keypair_id, code } => {
                write!(f, "key {keypair_id} has unknown state {code}")
            }
        }
    }
}

impl error::Error for EnforcerError {}

//------------ Warning -------------------------------------------------------

/// A condition that does not stop an enforcement pass.
///
/// Warnings are logged when they occur and collected into the result of
/// the pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Warning {
    /// The pool did not hold enough generated keys. Key generation needs
    /// to run before the next pass.
    InsufficientGeneratedKeys {
        zone: String,
        keytype: KeyType,
        shortfall: usize,
    },

    /// Keys were activated without a backup in a repository that does not
    /// insist on one.
    BackupMissing {
        zone: String,
        keytype: KeyType,
        keys: Vec<u64>,
    },

    /// Activation was refused because a backup is required first.
    BackupRequired {
        zone: String,
        keytype: KeyType,
        keys: Vec<u64>,
    },

    /// A key row carries a state code outside the ladder. It was skipped.
    UnknownKeyState { keypair_id: u64, code: i64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::InsufficientGeneratedKeys {
                zone,
                keytype,
                shortfall,
            } => write!(
                f,
                "zone {zone}: {shortfall} more generated {keytype}(s) needed"
            ),
            Warning::BackupMissing {
                zone,
                keytype,
                keys,
            } => {
                write!(f, "zone {zone}: activating non-recoverable {keytype} ")?;
                write_ids(f, keys)?;
                f.write_str(", no backup has been made")
            }
            Warning::BackupRequired {
                zone,
                keytype,
                keys,
            } => {
                write!(f, "zone {zone}: {keytype} ")?;
                write_ids(f, keys)?;
                f.write_str(" not activated, its repository requires a backup first")
            }
            Warning::UnknownKeyState { keypair_id, code } => {
                write!(f, "key {keypair_id} skipped, unknown state {code}")
            }
        }
    }
}

fn write_ids(f: &mut fmt::Formatter<'_>, ids: &[u64]) -> fmt::Result {
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{id}")?;
    }
    Ok(())
}
