//! Moving keys between states.
//!
//! Transitions come in two kinds. Time-gated transitions move every key
//! whose estimate for the destination state has passed. Demand-gated
//! transitions move a given number of keys regardless of time.
//!
//! Every transition stamps the destination state's column with the
//! reference time and clears `fixed_date`. Transitions into Active pass
//! the backup gate first.

use tracing::{debug, info, warn};

use super::count::generate_candidates;
use super::error::EnforcerError;
use super::key::{Key, KeyState, KeyType, Zone};
use super::policy::Parameters;
use super::query::{Assignment, Column, Compare, Filter, ZoneScope};
use super::store::Storage;
use super::time::UnixTime;

//------------ Moved ---------------------------------------------------------

/// The result of a transition.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Moved {
    /// The key pairs that changed state.
    pub keys: Vec<u64>,

    /// The transition requires a new DS situation at the parent.
    pub new_ds: bool,

    /// Keys activated without a backup.
    pub unbacked: Vec<u64>,
}

impl Moved {
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Checks that the engine may move keys of this type between the states.
pub fn check_transition(
    keytype: KeyType,
    src: KeyState,
    dst: KeyState,
) -> Result<(), EnforcerError> {
    use KeyState::*;

    if keytype == KeyType::Csk {
        return Err(EnforcerError::InvalidKeyType(keytype));
    }
    let valid = match (src, dst) {
        (Generate, Publish) | (Publish, Ready) | (Ready, Active) | (Active, Retire)
        | (Retire, Dead) => true,
        (Publish, Active) => keytype == KeyType::Zsk,
        (Generate, DsSub)
        | (DsSub, DsPublish)
        | (DsPublish, DsReady)
        | (DsReady, KeyPublish)
        | (KeyPublish, Active) => keytype == KeyType::Ksk,
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EnforcerError::InvalidStateTransition {
            keytype,
            from: src,
            to: dst,
        })
    }
}

/// Sets the state of the selected keys of one zone.
///
/// Only keys currently in `src` are changed. Returns their number.
pub fn change_state<S: Storage + ?Sized>(
    store: &mut S,
    zone_id: u64,
    ids: &[u64],
    src: KeyState,
    dst: KeyState,
    reference: UnixTime,
) -> Result<usize, EnforcerError> {
    if ids.is_empty() {
        return Ok(0);
    }
    store.update_keys(
        &[
            Assignment::state(dst),
            Assignment::date(dst, Some(reference)),
            Assignment::fixed_date(false),
        ],
        &Filter::new()
            .zone(ZoneScope::Zone(zone_id))
            .state(src)
            .ids(ids),
    )
}

/// Applies the backup gate to keys about to become active.
///
/// Fails if any key lacks a backup and its repository requires one.
/// Otherwise returns the keys that lack a backup.
pub fn backup_gate<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    keys: &[Key],
) -> Result<Vec<u64>, EnforcerError> {
    let mut required = Vec::new();
    let mut unbacked = Vec::new();
    for key in keys.iter().filter(|key| key.backup.is_none()) {
        let repository = store.repository(key.repository_id)?.ok_or_else(|| {
            EnforcerError::RepositoryNotFound(key.repository_id.to_string())
        })?;
        if repository.require_backup {
            required.push(key.keypair_id);
        } else {
            unbacked.push(key.keypair_id);
        }
    }
    if !required.is_empty() {
        return Err(EnforcerError::BackupRequired {
            keytype,
            keys: required,
        });
    }
    if !unbacked.is_empty() {
        warn!("activating {keytype}s without backup: {unbacked:?}");
    }
    Ok(unbacked)
}

/// Moves all keys whose estimate for `dst` has passed.
pub fn advance_time_gated<S: Storage + ?Sized>(
    store: &mut S,
    keytype: KeyType,
    src: KeyState,
    dst: KeyState,
    scope: ZoneScope,
    reference: UnixTime,
    params: &Parameters,
) -> Result<Moved, EnforcerError> {
    check_transition(keytype, src, dst)?;
    let candidates = store.keys(
        &Filter::new()
            .keytype(keytype)
            .state(src)
            .zone(scope)
            .date(dst, Compare::Le, reference)
            .order_by(Column::KeyId),
    )?;
    let mut moved = Moved::default();
    if candidates.is_empty() {
        return Ok(moved);
    }
    if dst == KeyState::Active {
        moved.unbacked = backup_gate(&*store, keytype, &candidates)?;
    }
    for key in &candidates {
        let Some(zone_id) = key.zone_id else {
            continue;
        };
        change_state(store, zone_id, &[key.keypair_id], src, dst, reference)?;
        moved.keys.push(key.keypair_id);
    }
    moved.new_ds = keytype == KeyType::Ksk
        && (dst == KeyState::Ready || (dst == KeyState::Dead && params.ds_driven()));
    debug!(
        "{keytype} {src} -> {dst}: {} key(s) {:?}",
        moved.count(),
        moved.keys
    );
    Ok(moved)
}

/// Moves exactly `count` keys of a zone from `src` to `dst`.
///
/// Keys leaving Generate are taken from the zone's supply, allocating pool
/// or shared keys to the zone as needed. If fewer keys are available than
/// requested, nothing is moved and the shortfall is returned as an
/// error.
#[allow(clippy::too_many_arguments)]
pub fn advance_demand_gated<S: Storage + ?Sized>(
    store: &mut S,
    keytype: KeyType,
    src: KeyState,
    dst: KeyState,
    count: usize,
    zone: &Zone,
    reference: UnixTime,
    params: &Parameters,
) -> Result<Moved, EnforcerError> {
    check_transition(keytype, src, dst)?;
    let mut moved = Moved::default();
    if count == 0 {
        return Ok(moved);
    }
    let candidates = if src == KeyState::Generate {
        generate_candidates(&*store, keytype, zone, params)?
    } else {
        store.keys(
            &Filter::new()
                .keytype(keytype)
                .state(src)
                .zone(ZoneScope::Zone(zone.id))
                .order_by(Column::KeyId)
                .limit(count),
        )?
    };
    if candidates.len() < count {
        return Err(EnforcerError::InsufficientGeneratedKeys {
            keytype,
            needed: count,
            available: candidates.len(),
        });
    }
    let selected = &candidates[..count];
    if dst == KeyState::Active {
        moved.unbacked = backup_gate(&*store, keytype, selected)?;
    }
    for key in selected {
        if key.zone_id != Some(zone.id) {
            debug!("allocating key {} to zone {}", key.keypair_id, zone.name);
            store.allocate(key.keypair_id, zone.id)?;
        }
        moved.keys.push(key.keypair_id);
    }
    let n = change_state(store, zone.id, &moved.keys, src, dst, reference)?;
    if n != count {
        return Err(EnforcerError::Storage(format!(
            "expected to move {count} {keytype}s in zone {}, moved {n}",
            zone.name
        )));
    }
    info!(
        "zone {}: {keytype} {src} -> {dst}: {:?}",
        zone.name, moved.keys
    );
    Ok(moved)
}

/// Retires the given active keys of a zone.
pub fn retire_keys<S: Storage + ?Sized>(
    store: &mut S,
    zone_id: u64,
    ids: &[u64],
    reference: UnixTime,
) -> Result<usize, EnforcerError> {
    change_state(
        store,
        zone_id,
        ids,
        KeyState::Active,
        KeyState::Retire,
        reference,
    )
}

/// Marks the active keys of a zone as due for retirement now.
///
/// This does not change their state.
pub fn stamp_retire<S: Storage + ?Sized>(
    store: &mut S,
    keytype: KeyType,
    zone_id: u64,
    reference: UnixTime,
) -> Result<usize, EnforcerError> {
    store.update_keys(
        &[Assignment::date(KeyState::Retire, Some(reference))],
        &Filter::new()
            .keytype(keytype)
            .state(KeyState::Active)
            .zone(ZoneScope::Zone(zone_id)),
    )
}

/// Returns the ids of the active keys of a zone.
pub fn active_keys<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    zone_id: u64,
) -> Result<Vec<u64>, EnforcerError> {
    Ok(store
        .keys(
            &Filter::new()
                .keytype(keytype)
                .state(KeyState::Active)
                .zone(ZoneScope::Zone(zone_id)),
        )?
        .into_iter()
        .map(|key| key.keypair_id)
        .collect())
}
