//! The storage the engine works on.
//!
//! The engine only talks to storage through the [`Storage`] trait. All of
//! a pass happens inside a [`Transaction`] which is rolled back unless it
//! is explicitly committed.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::error::EnforcerError;
use super::key::{Key, KeyPair, KeyState, Repository, Zone, ZoneKey};
use super::policy::Policy;
use super::query::{Assignment, Column, Filter};
use super::time::UnixTime;

//------------ Storage -------------------------------------------------------

/// A transactional store for policies, zones and keys.
///
/// Keys are presented as the join of key pairs and their zone instances,
/// see [`Key`]. Updates through [`Storage::update_keys`] change zone
/// instances, except for the backup column which belongs to the key pair.
pub trait Storage {
    /// Returns the keys matching the filter.
    fn keys(&self, filter: &Filter) -> Result<Vec<Key>, EnforcerError>;

    /// Returns the number of keys matching the filter.
    fn count_keys(&self, filter: &Filter) -> Result<usize, EnforcerError> {
        self.keys(filter).map(|keys| keys.len())
    }

    /// Applies the assignments to all keys matching the filter.
    ///
    /// Returns the number of keys changed.
    fn update_keys(
        &mut self,
        assignments: &[Assignment],
        filter: &Filter,
    ) -> Result<usize, EnforcerError>;

    /// Creates an instance of a key pair in a zone, in the Generate state.
    fn allocate(&mut self, keypair_id: u64, zone_id: u64) -> Result<(), EnforcerError>;

    /// Deletes the zone instances matching the filter.
    ///
    /// Returns the key pair ids of the deleted instances.
    fn delete_instances(&mut self, filter: &Filter) -> Result<Vec<u64>, EnforcerError>;

    /// Deletes a key pair. Returns whether it existed.
    fn delete_keypair(&mut self, keypair_id: u64) -> Result<bool, EnforcerError>;

    fn keypair(&self, keypair_id: u64) -> Result<Option<KeyPair>, EnforcerError>;

    /// Adds a key pair to the pool. The id of `pair` is replaced.
    fn insert_keypair(&mut self, pair: KeyPair) -> Result<u64, EnforcerError>;

    fn policy(&self, policy_id: u64) -> Result<Option<Policy>, EnforcerError>;
    fn policies(&self) -> Result<Vec<Policy>, EnforcerError>;

    fn zone(&self, zone_id: u64) -> Result<Option<Zone>, EnforcerError>;
    fn zone_by_name(&self, name: &str) -> Result<Option<Zone>, EnforcerError>;

    /// Returns all zones, or the zones of one policy.
    fn zones(&self, policy_id: Option<u64>) -> Result<Vec<Zone>, EnforcerError>;

    fn update_zone(&mut self, zone: &Zone) -> Result<(), EnforcerError>;

    fn repository(&self, repository_id: u64) -> Result<Option<Repository>, EnforcerError>;
    fn repository_by_name(&self, name: &str) -> Result<Option<Repository>, EnforcerError>;

    fn begin(&mut self) -> Result<(), EnforcerError>;
    fn commit(&mut self) -> Result<(), EnforcerError>;
    fn rollback(&mut self) -> Result<(), EnforcerError>;
}

//------------ Transaction ---------------------------------------------------

/// An open transaction on a store.
///
/// Dropping the transaction without calling [`Transaction::commit`] rolls
/// it back.
pub struct Transaction<'a, S: Storage + ?Sized> {
    store: &'a mut S,
    open: bool,
}

impl<'a, S: Storage + ?Sized> Transaction<'a, S> {
    pub fn begin(store: &'a mut S) -> Result<Self, EnforcerError> {
        store.begin()?;
        Ok(Transaction { store, open: true })
    }

    pub fn commit(mut self) -> Result<(), EnforcerError> {
        self.open = false;
        self.store.commit()
    }
}

impl<S: Storage + ?Sized> Deref for Transaction<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S: Storage + ?Sized> DerefMut for Transaction<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.store
    }
}

impl<S: Storage + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if self.open {
            debug!("rolling back transaction");
            if let Err(err) = self.store.rollback() {
                error!("rollback failed: {err}");
            }
        }
    }
}

//------------ Tables --------------------------------------------------------

/// The persisted content of a store.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Tables {
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub keypairs: Vec<KeyPair>,
    #[serde(default)]
    pub dnsseckeys: Vec<ZoneKey>,
}

impl Tables {
    /// The joined key view.
    fn key_view(&self) -> Vec<Key> {
        let mut res = Vec::new();
        for pair in &self.keypairs {
            let mut allocated = false;
            for instance in self.dnsseckeys.iter().filter(|zk| zk.keypair_id == pair.id) {
                allocated = true;
                res.push(Key::new(pair, Some(instance)));
            }
            if !allocated {
                res.push(Key::new(pair, None));
            }
        }
        res
    }
}

//------------ MemoryStore ---------------------------------------------------

/// A store keeping everything in memory.
///
/// A transaction keeps a snapshot of the tables to return to on rollback.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Tables,
    snapshot: Option<Tables>,

    /// Number of key updates to allow before failing.
    #[cfg(test)]
    pub fail_updates_after: Option<usize>,
}

impl MemoryStore {
    pub fn new(tables: Tables) -> Self {
        MemoryStore {
            tables,
            ..Default::default()
        }
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Adds a policy, replacing one with the same name.
    pub fn add_policy(&mut self, mut policy: Policy) -> u64 {
        if let Some(old) = self.tables.policies.iter_mut().find(|p| p.name == policy.name) {
            policy.id = old.id;
            *old = policy;
            return old.id;
        }
        policy.id = next_id(self.tables.policies.iter().map(|p| p.id));
        let id = policy.id;
        self.tables.policies.push(policy);
        id
    }

    pub fn add_repository(&mut self, mut repository: Repository) -> Result<u64, EnforcerError> {
        if self.repository_by_name(&repository.name)?.is_some() {
            return Err(EnforcerError::Storage(format!(
                "repository {} already exists",
                repository.name
            )));
        }
        repository.id = next_id(self.tables.repositories.iter().map(|r| r.id));
        let id = repository.id;
        self.tables.repositories.push(repository);
        Ok(id)
    }

    pub fn add_zone(&mut self, mut zone: Zone) -> Result<u64, EnforcerError> {
        if self.zone_by_name(&zone.name)?.is_some() {
            return Err(EnforcerError::Storage(format!(
                "zone {} already exists",
                zone.name
            )));
        }
        if self.policy(zone.policy_id)?.is_none() {
            return Err(EnforcerError::PolicyNotFound(zone.policy_id));
        }
        zone.id = next_id(self.tables.zones.iter().map(|z| z.id));
        let id = zone.id;
        self.tables.zones.push(zone);
        Ok(id)
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.tables.repositories
    }

    /// Adds a zone instance directly, for setting up test situations.
    #[cfg(test)]
    pub fn insert_instance(&mut self, instance: ZoneKey) {
        self.tables.dnsseckeys.push(instance);
    }

    #[cfg(test)]
    fn check_failure(&mut self) -> Result<(), EnforcerError> {
        match self.fail_updates_after {
            Some(0) => Err(EnforcerError::Storage("injected failure".into())),
            Some(ref mut n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn check_failure(&mut self) -> Result<(), EnforcerError> {
        Ok(())
    }
}

impl Storage for MemoryStore {
    fn keys(&self, filter: &Filter) -> Result<Vec<Key>, EnforcerError> {
        Ok(filter.select(&self.tables.key_view()))
    }

    fn update_keys(
        &mut self,
        assignments: &[Assignment],
        filter: &Filter,
    ) -> Result<usize, EnforcerError> {
        self.check_failure()?;
        let selected = self.keys(filter)?;
        debug!(
            "UPDATE keys SET {} WHERE {filter}: {} rows",
            DisplayList(assignments),
            selected.len()
        );
        for key in &selected {
            for assignment in assignments {
                apply(&mut self.tables, key, assignment)?;
            }
        }
        Ok(selected.len())
    }

    fn allocate(&mut self, keypair_id: u64, zone_id: u64) -> Result<(), EnforcerError> {
        self.check_failure()?;
        let pair = self
            .tables
            .keypairs
            .iter()
            .find(|p| p.id == keypair_id)
            .ok_or_else(|| EnforcerError::Storage(format!("no key pair {keypair_id}")))?;
        if self
            .tables
            .dnsseckeys
            .iter()
            .any(|zk| zk.keypair_id == keypair_id && zk.zone_id == zone_id)
        {
            return Err(EnforcerError::Storage(format!(
                "key pair {keypair_id} already allocated to zone {zone_id}"
            )));
        }
        let mut instance = ZoneKey {
            keypair_id,
            zone_id,
            state: KeyState::Generate.code(),
            dates: Default::default(),
            fixed_date: false,
            revoked: false,
        };
        instance.dates.generate = Some(pair.generate);
        self.tables.dnsseckeys.push(instance);
        Ok(())
    }

    fn delete_instances(&mut self, filter: &Filter) -> Result<Vec<u64>, EnforcerError> {
        self.check_failure()?;
        let selected: Vec<_> = self
            .keys(filter)?
            .into_iter()
            .filter_map(|key| key.zone_id.map(|zone_id| (key.keypair_id, zone_id)))
            .collect();
        self.tables
            .dnsseckeys
            .retain(|zk| !selected.contains(&(zk.keypair_id, zk.zone_id)));
        Ok(selected.into_iter().map(|(id, _)| id).collect())
    }

    fn delete_keypair(&mut self, keypair_id: u64) -> Result<bool, EnforcerError> {
        self.check_failure()?;
        let len = self.tables.keypairs.len();
        self.tables.keypairs.retain(|p| p.id != keypair_id);
        self.tables.dnsseckeys.retain(|zk| zk.keypair_id != keypair_id);
        Ok(self.tables.keypairs.len() != len)
    }

    fn keypair(&self, keypair_id: u64) -> Result<Option<KeyPair>, EnforcerError> {
        Ok(self
            .tables
            .keypairs
            .iter()
            .find(|p| p.id == keypair_id)
            .cloned())
    }

    fn insert_keypair(&mut self, mut pair: KeyPair) -> Result<u64, EnforcerError> {
        self.check_failure()?;
        pair.id = next_id(self.tables.keypairs.iter().map(|p| p.id));
        let id = pair.id;
        self.tables.keypairs.push(pair);
        Ok(id)
    }

    fn policy(&self, policy_id: u64) -> Result<Option<Policy>, EnforcerError> {
        Ok(self
            .tables
            .policies
            .iter()
            .find(|p| p.id == policy_id)
            .cloned())
    }

    fn policies(&self) -> Result<Vec<Policy>, EnforcerError> {
        Ok(self.tables.policies.clone())
    }

    fn zone(&self, zone_id: u64) -> Result<Option<Zone>, EnforcerError> {
        Ok(self.tables.zones.iter().find(|z| z.id == zone_id).cloned())
    }

    fn zone_by_name(&self, name: &str) -> Result<Option<Zone>, EnforcerError> {
        Ok(self
            .tables
            .zones
            .iter()
            .find(|z| z.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    fn zones(&self, policy_id: Option<u64>) -> Result<Vec<Zone>, EnforcerError> {
        Ok(self
            .tables
            .zones
            .iter()
            .filter(|z| policy_id.map_or(true, |id| z.policy_id == id))
            .cloned()
            .collect())
    }

    fn update_zone(&mut self, zone: &Zone) -> Result<(), EnforcerError> {
        self.check_failure()?;
        let stored = self
            .tables
            .zones
            .iter_mut()
            .find(|z| z.id == zone.id)
            .ok_or_else(|| EnforcerError::ZoneNotFound(zone.name.clone()))?;
        *stored = zone.clone();
        Ok(())
    }

    fn repository(&self, repository_id: u64) -> Result<Option<Repository>, EnforcerError> {
        Ok(self
            .tables
            .repositories
            .iter()
            .find(|r| r.id == repository_id)
            .cloned())
    }

    fn repository_by_name(&self, name: &str) -> Result<Option<Repository>, EnforcerError> {
        Ok(self
            .tables
            .repositories
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }

    fn begin(&mut self) -> Result<(), EnforcerError> {
        if self.snapshot.is_some() {
            return Err(EnforcerError::Storage(
                "transaction already in progress".into(),
            ));
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), EnforcerError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| EnforcerError::Storage("no transaction to commit".into()))
    }

    fn rollback(&mut self) -> Result<(), EnforcerError> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| EnforcerError::Storage("no transaction to roll back".into()))?;
        self.tables = snapshot;
        Ok(())
    }
}

/// Applies one assignment to the rows behind a key.
fn apply(tables: &mut Tables, key: &Key, assignment: &Assignment) -> Result<(), EnforcerError> {
    if assignment.column == Column::Backup {
        if let Some(pair) = tables.keypairs.iter_mut().find(|p| p.id == key.keypair_id) {
            pair.backup = assignment.value.map(UnixTime::from_field);
        }
        return Ok(());
    }
    let Some(zone_id) = key.zone_id else {
        return Err(EnforcerError::Storage(format!(
            "cannot set {} on unallocated key {}",
            assignment.column, key.keypair_id
        )));
    };
    let Some(instance) = tables
        .dnsseckeys
        .iter_mut()
        .find(|zk| zk.keypair_id == key.keypair_id && zk.zone_id == zone_id)
    else {
        return Ok(());
    };
    match assignment.column {
        Column::State => {
            instance.state = assignment
                .value
                .ok_or_else(|| EnforcerError::Storage("state cannot be NULL".into()))?;
        }
        Column::Date(state) => {
            instance
                .dates
                .set(state, assignment.value.map(UnixTime::from_field));
        }
        Column::FixedDate => instance.fixed_date = assignment.value.unwrap_or(0) != 0,
        Column::Revoked => instance.revoked = assignment.value.unwrap_or(0) != 0,
        column => {
            return Err(EnforcerError::Storage(format!(
                "column {column} cannot be updated"
            )))
        }
    }
    Ok(())
}

fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().map_or(1, |id| id + 1)
}

/// Displays a list of assignments separated by commas.
struct DisplayList<'a>(&'a [Assignment]);

impl std::fmt::Display for DisplayList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}
