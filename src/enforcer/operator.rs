//! Notifications from an operator.
//!
//! Some transitions depend on things only an operator knows about, most of
//! all what the parent zone is doing with the DS records. Each of these
//! runs in its own transaction.

use tracing::info;

use super::error::{EnforcerError, Warning};
use super::key::{Key, KeyState, KeyType, Zone};
use super::query::{Assignment, Column, Compare, Filter, Predicate, ZoneScope};
use super::store::{Storage, Transaction};
use super::time::UnixTime;
use super::transition::{active_keys, backup_gate, change_state, check_transition, retire_keys};

/// Looks up a zone by name.
pub fn find_zone<S: Storage + ?Sized>(store: &S, name: &str) -> Result<Zone, EnforcerError> {
    store
        .zone_by_name(name)?
        .ok_or_else(|| EnforcerError::ZoneNotFound(name.into()))
}

/// Looks up the instance of a key in a zone.
fn find_key<S: Storage + ?Sized>(
    store: &S,
    zone: &Zone,
    keypair_id: u64,
) -> Result<(Key, KeyState), EnforcerError> {
    let key = store
        .keys(
            &Filter::new()
                .ids(&[keypair_id])
                .zone(ZoneScope::Zone(zone.id)),
        )?
        .into_iter()
        .next()
        .ok_or_else(|| EnforcerError::KeyNotFound {
            keypair_id,
            zone: zone.name.clone(),
        })?;
    let state = key.state().ok_or(EnforcerError::UnknownKeyState {
        keypair_id,
        code: key.state_code,
    })?;
    Ok((key, state))
}

/// Checks that a key is in the state a notification expects.
fn expect_state(
    key: &Key,
    state: KeyState,
    src: KeyState,
    dst: KeyState,
) -> Result<(), EnforcerError> {
    check_transition(key.keytype, src, dst)?;
    if state != src {
        return Err(EnforcerError::InvalidStateTransition {
            keytype: key.keytype,
            from: state,
            to: dst,
        });
    }
    Ok(())
}

/// The DS of a KSK has been submitted to the parent.
pub fn ds_submitted<S: Storage + ?Sized>(
    store: &mut S,
    zone: &str,
    keypair_id: u64,
    reference: UnixTime,
) -> Result<(), EnforcerError> {
    let mut txn = Transaction::begin(store)?;
    let zone = find_zone(&*txn, zone)?;
    let (key, state) = find_key(&*txn, &zone, keypair_id)?;
    expect_state(&key, state, KeyState::DsSub, KeyState::DsPublish)?;
    change_state(
        &mut *txn,
        zone.id,
        &[keypair_id],
        KeyState::DsSub,
        KeyState::DsPublish,
        reference,
    )?;
    txn.commit()?;
    info!("zone {}: DS of KSK {keypair_id} submitted", zone.name);
    Ok(())
}

/// The DS of a ready KSK has been seen at the parent.
///
/// The KSK becomes active and any previously active KSK is retired.
pub fn ds_seen<S: Storage + ?Sized>(
    store: &mut S,
    zone: &str,
    keypair_id: u64,
    reference: UnixTime,
) -> Result<Vec<Warning>, EnforcerError> {
    let mut txn = Transaction::begin(store)?;
    let mut zone = find_zone(&*txn, zone)?;
    let (key, state) = find_key(&*txn, &zone, keypair_id)?;
    expect_state(&key, state, KeyState::Ready, KeyState::Active)?;
    if key.keytype != KeyType::Ksk {
        return Err(EnforcerError::InvalidKeyType(key.keytype));
    }
    let unbacked = backup_gate(&*txn, key.keytype, std::slice::from_ref(&key))?;
    let old = active_keys(&*txn, KeyType::Ksk, zone.id)?;
    change_state(
        &mut *txn,
        zone.id,
        &[keypair_id],
        KeyState::Ready,
        KeyState::Active,
        reference,
    )?;
    retire_keys(&mut *txn, zone.id, &old, reference)?;
    if zone.roll_ksk_now {
        zone.roll_ksk_now = false;
        txn.update_zone(&zone)?;
    }
    txn.commit()?;
    info!("zone {}: KSK {keypair_id} active, retired {old:?}", zone.name);

    let mut warnings = Vec::new();
    if !unbacked.is_empty() {
        warnings.push(Warning::BackupMissing {
            zone: zone.name,
            keytype: KeyType::Ksk,
            keys: unbacked,
        });
    }
    Ok(warnings)
}

/// Asks for a rollover of a zone's keys at the next pass.
pub fn request_rollover<S: Storage + ?Sized>(
    store: &mut S,
    zone: &str,
    keytype: KeyType,
) -> Result<(), EnforcerError> {
    if keytype == KeyType::Csk {
        return Err(EnforcerError::InvalidKeyType(keytype));
    }
    let mut txn = Transaction::begin(store)?;
    let mut zone = find_zone(&*txn, zone)?;
    zone.set_roll_now(keytype, true);
    txn.update_zone(&zone)?;
    txn.commit()?;
    info!("zone {}: {keytype} rollover requested", zone.name);
    Ok(())
}

/// Records that all keys of a repository have been backed up.
///
/// Returns the number of keys newly marked.
pub fn backup_done<S: Storage + ?Sized>(
    store: &mut S,
    repository: &str,
    time: UnixTime,
) -> Result<usize, EnforcerError> {
    let mut txn = Transaction::begin(store)?;
    let repository = txn
        .repository_by_name(repository)?
        .ok_or_else(|| EnforcerError::RepositoryNotFound(repository.into()))?;
    let filter = Filter::new()
        .and(Predicate::Compare(
            Column::Repository,
            Compare::Eq,
            i64::try_from(repository.id).unwrap_or(i64::MAX),
        ))
        .and(Predicate::IsNull(Column::Backup));
    // A shared key shows up once per zone, count key pairs.
    let mut ids: Vec<u64> = txn.keys(&filter)?.into_iter().map(|k| k.keypair_id).collect();
    ids.sort_unstable();
    ids.dedup();
    txn.update_keys(&[Assignment::backup(time)], &filter)?;
    txn.commit()?;
    info!(
        "repository {}: {} key(s) marked as backed up",
        repository.name,
        ids.len()
    );
    Ok(ids.len())
}

/// Sets the time of a state of a key by hand.
///
/// The estimator leaves the key alone until its next transition.
pub fn fix_date<S: Storage + ?Sized>(
    store: &mut S,
    zone: &str,
    keypair_id: u64,
    state: KeyState,
    time: UnixTime,
) -> Result<(), EnforcerError> {
    let mut txn = Transaction::begin(store)?;
    let zone = find_zone(&*txn, zone)?;
    let (key, _) = find_key(&*txn, &zone, keypair_id)?;
    if key.keytype == KeyType::Zsk && state.is_ksk_only() {
        return Err(EnforcerError::InvalidKeyType(key.keytype));
    }
    txn.update_keys(
        &[Assignment::date(state, Some(time)), Assignment::fixed_date(true)],
        &Filter::new()
            .ids(&[keypair_id])
            .zone(ZoneScope::Zone(zone.id)),
    )?;
    txn.commit()?;
    info!(
        "zone {}: {state} time of key {keypair_id} fixed at {time}",
        zone.name
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::store::tests::{add_zone_key, test_store};
    use crate::enforcer::store::MemoryStore;

    fn state_of(store: &MemoryStore, id: u64) -> Option<KeyState> {
        store.keys(&Filter::new().ids(&[id])).unwrap()[0].state()
    }

    #[test]
    fn ds_submitted_moves_dssub_only() {
        let mut store = test_store();
        let a = add_zone_key(&mut store, KeyType::Ksk, KeyState::DsSub, 10);
        let b = add_zone_key(&mut store, KeyType::Ksk, KeyState::Active, 10);
        ds_submitted(&mut store, "example.com", a, UnixTime::from_secs(20)).unwrap();
        assert_eq!(state_of(&store, a), Some(KeyState::DsPublish));
        assert_eq!(
            ds_submitted(&mut store, "example.com", b, UnixTime::from_secs(20)),
            Err(EnforcerError::InvalidStateTransition {
                keytype: KeyType::Ksk,
                from: KeyState::Active,
                to: KeyState::DsPublish
            })
        );
        assert!(matches!(
            ds_submitted(&mut store, "example.com", 99, UnixTime::from_secs(20)),
            Err(EnforcerError::KeyNotFound { keypair_id: 99, .. })
        ));
        assert!(matches!(
            ds_submitted(&mut store, "example.net", a, UnixTime::from_secs(20)),
            Err(EnforcerError::ZoneNotFound(_))
        ));
    }

    #[test]
    fn ds_seen_swaps_active_ksk() {
        let mut store = test_store();
        let old = add_zone_key(&mut store, KeyType::Ksk, KeyState::Active, 10);
        let new = add_zone_key(&mut store, KeyType::Ksk, KeyState::Ready, 10);
        request_rollover(&mut store, "example.com", KeyType::Ksk).unwrap();
        let warnings = ds_seen(&mut store, "example.com", new, UnixTime::from_secs(30)).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(state_of(&store, new), Some(KeyState::Active));
        assert_eq!(state_of(&store, old), Some(KeyState::Retire));
        assert!(!store.zone(1).unwrap().unwrap().roll_ksk_now);
    }

    #[test]
    fn ds_seen_rejects_zsk() {
        let mut store = test_store();
        let id = add_zone_key(&mut store, KeyType::Zsk, KeyState::Ready, 10);
        assert_eq!(
            ds_seen(&mut store, "example.com", id, UnixTime::from_secs(30)),
            Err(EnforcerError::InvalidKeyType(KeyType::Zsk))
        );
        assert_eq!(state_of(&store, id), Some(KeyState::Ready));
    }

    #[test]
    fn backup_done_counts_key_pairs() {
        let mut store = test_store();
        add_zone_key(&mut store, KeyType::Ksk, KeyState::Active, 10);
        add_zone_key(&mut store, KeyType::Zsk, KeyState::Active, 10);
        assert_eq!(
            backup_done(&mut store, "softhsm", UnixTime::from_secs(50)).unwrap(),
            2
        );
        assert_eq!(
            backup_done(&mut store, "softhsm", UnixTime::from_secs(60)).unwrap(),
            0
        );
        assert!(matches!(
            backup_done(&mut store, "nope", UnixTime::from_secs(60)),
            Err(EnforcerError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn fixed_date_sticks() {
        let mut store = test_store();
        let id = add_zone_key(&mut store, KeyType::Zsk, KeyState::Publish, 10);
        fix_date(
            &mut store,
            "example.com",
            id,
            KeyState::Ready,
            UnixTime::from_secs(99),
        )
        .unwrap();
        let key = &store.keys(&Filter::new().ids(&[id])).unwrap()[0];
        assert!(key.fixed_date);
        assert_eq!(key.dates.ready, Some(UnixTime::from_secs(99)));
        assert_eq!(
            fix_date(
                &mut store,
                "example.com",
                id,
                KeyState::DsReady,
                UnixTime::from_secs(99)
            ),
            Err(EnforcerError::InvalidKeyType(KeyType::Zsk))
        );
    }
}
