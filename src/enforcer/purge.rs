//! Removing dead keys.

use tracing::{debug, info, warn};

use super::error::EnforcerError;
use super::hsm::{KeyLookup, KeyMaterial};
use super::key::KeyState;
use super::policy::Parameters;
use super::query::{Column, Compare, Filter, Predicate, ZoneScope};
use super::store::{Storage, Transaction};
use super::time::UnixTime;

/// Which keys a purge looks at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PurgeScope {
    Zone(u64),
    Policy(u64),
}

/// What a purge removed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Purged {
    /// Number of zone instances removed.
    pub instances: usize,

    /// The key pairs removed together with their key material.
    pub keypairs: Vec<u64>,
}

/// Removes dead keys.
///
/// Dead zone instances in the scope are deleted. Key pairs left without
/// any instance are deleted as well, together with their key material.
/// With `dead_before`, only keys that died before that time are removed.
/// Key material is only deleted once the removal has been committed.
///
/// Purging again without any intervening change does nothing.
pub fn purge_dead_keys<S, H>(
    store: &mut S,
    hsm: &mut H,
    scope: PurgeScope,
    dead_before: Option<UnixTime>,
) -> Result<Purged, EnforcerError>
where
    S: Storage + ?Sized,
    H: KeyMaterial + ?Sized,
{
    let mut filter = Filter::new().state(KeyState::Dead);
    filter = match scope {
        PurgeScope::Zone(id) => filter.zone(ZoneScope::Zone(id)),
        PurgeScope::Policy(id) => filter.policy(id).zone(ZoneScope::All),
    };
    if let Some(time) = dead_before {
        filter = filter.date(KeyState::Dead, Compare::Le, time);
    }

    let mut txn = Transaction::begin(store)?;
    let mut deleted = txn.delete_instances(&filter)?;
    let mut purged = Purged {
        instances: deleted.len(),
        ..Default::default()
    };
    deleted.sort_unstable();
    deleted.dedup();
    let mut locators = Vec::new();
    for keypair_id in deleted {
        let remaining = txn.count_keys(
            &Filter::new()
                .ids(&[keypair_id])
                .and(Predicate::NotNull(Column::ZoneId)),
        )?;
        if remaining > 0 {
            debug!("key {keypair_id} still used by {remaining} zone(s)");
            continue;
        }
        let Some(pair) = txn.keypair(keypair_id)? else {
            continue;
        };
        txn.delete_keypair(keypair_id)?;
        purged.keypairs.push(keypair_id);
        locators.push(pair.locator);
    }
    txn.commit()?;

    for locator in locators {
        let res = match hsm.find_key(&locator) {
            Ok(KeyLookup::Exists) => hsm.delete_key(&locator),
            Ok(KeyLookup::NotFound) => {
                debug!("key material {locator} already gone");
                Ok(())
            }
            Err(err) => Err(err),
        };
        if let Err(err) = res {
            warn!("key material {locator} left behind: {err}");
        }
    }
    if purged.instances > 0 {
        info!(
            "purged {} dead key instance(s), deleted key pairs {:?}",
            purged.instances, purged.keypairs
        );
    }
    Ok(purged)
}

/// Purges the keys of a policy that have been dead for long enough.
///
/// Does nothing if the policy has no purge delay.
pub fn purge_expired<S, H>(
    store: &mut S,
    hsm: &mut H,
    policy_id: u64,
    reference: UnixTime,
) -> Result<Purged, EnforcerError>
where
    S: Storage + ?Sized,
    H: KeyMaterial + ?Sized,
{
    let params = Parameters::load(&*store, policy_id)?;
    match params.purge_after {
        Some(delay) => purge_dead_keys(
            store,
            hsm,
            PurgeScope::Policy(policy_id),
            Some(reference.sub_secs(delay)),
        ),
        None => Ok(Purged::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::hsm::SoftHsm;
    use crate::enforcer::key::{KeyPair, KeyType, Repository, Zone};
    use crate::enforcer::store::tests::{add_zone_key, test_store};
    use crate::enforcer::store::MemoryStore;

    /// Adds a key with real key material in the given state.
    fn add_key(
        store: &mut MemoryStore,
        hsm: &mut SoftHsm,
        zones: &[(u64, KeyState)],
        dead: u64,
    ) -> u64 {
        let repo = Repository {
            id: 1,
            name: "softhsm".into(),
            require_backup: false,
            capacity: None,
        };
        let locator = hsm.generate_key(&repo, 8, 1024).unwrap();
        let id = store
            .insert_keypair(KeyPair {
                id: 0,
                locator,
                keytype: KeyType::Zsk,
                algorithm: 8,
                bits: 1024,
                repository_id: 1,
                policy_id: 1,
                generate: UnixTime::from_secs(0),
                backup: None,
            })
            .unwrap();
        for &(zone_id, state) in zones {
            store.allocate(id, zone_id).unwrap();
            store
                .update_keys(
                    &[
                        crate::enforcer::query::Assignment::state(state),
                        crate::enforcer::query::Assignment::date(
                            KeyState::Dead,
                            Some(UnixTime::from_secs(dead)),
                        ),
                    ],
                    &Filter::new().ids(&[id]).zone(ZoneScope::Zone(zone_id)),
                )
                .unwrap();
        }
        id
    }

    fn second_zone(store: &mut MemoryStore) {
        store
            .add_zone(Zone {
                id: 0,
                name: "example.org".into(),
                policy_id: 1,
                signconf: None,
                roll_ksk_now: false,
                roll_zsk_now: false,
            })
            .unwrap();
    }

    #[test]
    fn purge_is_idempotent() {
        let mut store = test_store();
        let mut hsm = SoftHsm::default();
        let dead = add_key(&mut store, &mut hsm, &[(1, KeyState::Dead)], 100);
        let live = add_key(&mut store, &mut hsm, &[(1, KeyState::Active)], 100);

        let purged = purge_dead_keys(&mut store, &mut hsm, PurgeScope::Zone(1), None).unwrap();
        assert_eq!(
            purged,
            Purged {
                instances: 1,
                keypairs: vec![dead]
            }
        );
        assert_eq!(hsm.len(), 1);
        assert!(store.keypair(dead).unwrap().is_none());
        assert!(store.keypair(live).unwrap().is_some());

        let after_first = store.tables().clone();
        let purged = purge_dead_keys(&mut store, &mut hsm, PurgeScope::Zone(1), None).unwrap();
        assert_eq!(purged, Purged::default());
        assert_eq!(store.tables(), &after_first);
        assert_eq!(hsm.len(), 1);
    }

    #[test]
    fn shared_key_survives_until_dead_everywhere() {
        let mut store = test_store();
        let mut hsm = SoftHsm::default();
        second_zone(&mut store);
        let id = add_key(
            &mut store,
            &mut hsm,
            &[(1, KeyState::Dead), (2, KeyState::Active)],
            100,
        );
        let purged = purge_dead_keys(&mut store, &mut hsm, PurgeScope::Policy(1), None).unwrap();
        assert_eq!(purged.instances, 1);
        assert!(purged.keypairs.is_empty());
        assert!(store.keypair(id).unwrap().is_some());
        assert_eq!(hsm.len(), 1);
    }

    #[test]
    fn failed_purge_keeps_material() {
        let mut store = test_store();
        let mut hsm = SoftHsm::default();
        add_key(&mut store, &mut hsm, &[(1, KeyState::Dead)], 100);
        add_key(&mut store, &mut hsm, &[(1, KeyState::Dead)], 100);
        let before = store.tables().clone();

        // Deleting the instances and the first key pair works, the second
        // key pair fails.
        store.fail_updates_after = Some(2);
        let res = purge_dead_keys(&mut store, &mut hsm, PurgeScope::Zone(1), None);
        assert!(matches!(res, Err(EnforcerError::Storage(_))));
        assert_eq!(store.tables(), &before);
        assert_eq!(hsm.len(), 2);

        store.fail_updates_after = None;
        let purged = purge_dead_keys(&mut store, &mut hsm, PurgeScope::Zone(1), None).unwrap();
        assert_eq!(purged.keypairs.len(), 2);
        assert!(hsm.is_empty());
    }

    #[test]
    fn missing_material_is_fine() {
        let mut store = test_store();
        let mut hsm = SoftHsm::default();
        let id = add_zone_key(&mut store, KeyType::Zsk, KeyState::Dead, 100);
        let purged = purge_dead_keys(&mut store, &mut hsm, PurgeScope::Zone(1), None).unwrap();
        assert_eq!(purged.keypairs, vec![id]);
    }

    #[test]
    fn expired_only() {
        let mut store = test_store();
        let mut hsm = SoftHsm::default();
        let old = add_key(&mut store, &mut hsm, &[(1, KeyState::Dead)], 100);
        let recent = add_key(&mut store, &mut hsm, &[(1, KeyState::Dead)], 5000);

        // Without a purge delay nothing happens.
        let purged = purge_expired(&mut store, &mut hsm, 1, UnixTime::from_secs(10_000)).unwrap();
        assert_eq!(purged, Purged::default());

        let mut tables = store.tables().clone();
        tables.policies[0].params.purge_after = Some(1000);
        let mut store = MemoryStore::new(tables);
        let purged = purge_expired(&mut store, &mut hsm, 1, UnixTime::from_secs(5500)).unwrap();
        assert_eq!(purged.keypairs, vec![old]);
        assert!(store.keypair(recent).unwrap().is_some());
    }
}
