//! Counting keys and predicting demand.
//!
//! These are read only. The transition engine uses them to decide how many
//! keys to promote, key generation uses [`predict_keys_needed_over_interval`]
//! to size its batches. Both go through [`demand`] so they agree.

use super::error::EnforcerError;
use super::key::{Key, KeyState, KeyType, Zone};
use super::policy::Parameters;
use super::query::{Column, Compare, Filter, Predicate, ZoneScope};
use super::store::Storage;
use super::time::UnixTime;

fn keys_of(keytype: KeyType, scope: ZoneScope) -> Filter {
    Filter::new().keytype(keytype).zone(scope)
}

pub fn count_in_state<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    state: KeyState,
    scope: ZoneScope,
) -> Result<usize, EnforcerError> {
    store.count_keys(&keys_of(keytype, scope).state(state))
}

/// Keys that are or will be usable without further DS coordination.
pub fn count_available<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    scope: ZoneScope,
) -> Result<usize, EnforcerError> {
    store.count_keys(&keys_of(keytype, scope).states(&KeyState::AVAILABLE))
}

/// KSKs somewhere in the DS pipeline.
pub fn count_standby<S: Storage + ?Sized>(
    store: &S,
    scope: ZoneScope,
) -> Result<usize, EnforcerError> {
    store.count_keys(&keys_of(KeyType::Ksk, scope).states(&KeyState::STANDBY))
}

/// Active keys due to retire no later than `horizon` seconds from now.
pub fn count_pending_retirement<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    reference: UnixTime,
    horizon: u64,
    scope: ZoneScope,
) -> Result<usize, EnforcerError> {
    store.count_keys(
        &keys_of(keytype, scope)
            .state(KeyState::Active)
            .date(KeyState::Retire, Compare::Le, reference.add_secs(horizon)),
    )
}

/// Active keys that are not yet due to retire.
///
/// A key without a retire estimate lives forever.
pub fn count_active_remaining<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    reference: UnixTime,
    scope: ZoneScope,
) -> Result<usize, EnforcerError> {
    store.count_keys(
        &keys_of(keytype, scope)
            .state(KeyState::Active)
            .and(Predicate::Any(vec![
                Predicate::Compare(
                    Column::Date(KeyState::Retire),
                    Compare::Gt,
                    reference.as_field(),
                ),
                Predicate::IsNull(Column::Date(KeyState::Retire)),
            ])),
    )
}

/// Whether no key of this type has progressed beyond Publish yet.
///
/// DSSub is level with Publish on the ladder and does not end the first
/// pass.
pub fn is_first_pass<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    scope: ZoneScope,
) -> Result<bool, EnforcerError> {
    let beyond: Vec<_> = KeyState::ALL
        .into_iter()
        .filter(|s| s.rank() > KeyState::Publish.rank())
        .collect();
    Ok(store.count_keys(&keys_of(keytype, scope).states(&beyond))? == 0)
}

/// The keys a demand-gated promotion out of Generate may take for a zone.
///
/// The zone's own Generate instances come first. With key sharing, the
/// keys other zones of the policy still use and this zone does not have
/// yet follow, so that zones end up on the same keys. The unallocated pool
/// of the policy comes last.
pub fn generate_candidates<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    zone: &Zone,
    params: &Parameters,
) -> Result<Vec<Key>, EnforcerError> {
    let mut res = store.keys(
        &keys_of(keytype, ZoneScope::Zone(zone.id))
            .state(KeyState::Generate)
            .order_by(Column::KeyId),
    )?;
    let base = Filter::new().keytype(keytype).policy(zone.policy_id);
    if params.share_keys {
        let own: Vec<u64> = store
            .keys(&keys_of(keytype, ZoneScope::Zone(zone.id)))?
            .into_iter()
            .map(|key| key.keypair_id)
            .collect();
        let shared = store.keys(
            &base
                .clone()
                .zone(ZoneScope::All)
                .and(Predicate::Compare(
                    Column::ZoneId,
                    Compare::Ne,
                    i64::try_from(zone.id).unwrap_or(i64::MAX),
                ))
                .states(&SHAREABLE)
                .order_by(Column::KeyId),
        )?;
        for key in shared {
            let taken = own.contains(&key.keypair_id)
                || res.iter().any(|k| k.keypair_id == key.keypair_id);
            if !taken {
                res.push(key);
            }
        }
    }
    res.extend(store.keys(
        &base
            .and(Predicate::IsNull(Column::ZoneId))
            .order_by(Column::KeyId),
    )?);
    Ok(res)
}

/// States in which a key of one zone may be taken up by another.
const SHAREABLE: [KeyState; 8] = [
    KeyState::Generate,
    KeyState::Publish,
    KeyState::Ready,
    KeyState::Active,
    KeyState::DsSub,
    KeyState::DsPublish,
    KeyState::DsReady,
    KeyState::KeyPublish,
];

//------------ Demand --------------------------------------------------------

/// The outcome of the demand computation for one zone and key type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Demand {
    /// Keys that should be available.
    pub required: usize,

    /// Keys that are available and not about to retire.
    pub available: usize,

    /// Active keys retiring within the horizon.
    pub pending: usize,

    /// Keys to take out of Generate.
    pub new: usize,
}

/// Computes how many keys must leave Generate.
///
/// One key is always required, plus the standby ZSKs. KSK standby keys are
/// provisioned separately. Active keys retiring before a new key could be
/// published are not counted as available. For a DS-driven KSK beyond the
/// first pass, keys in the DS pipeline in excess of the standby quota are
/// counted as available since they are on their way to replace the active
/// key.
pub fn demand<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    zone_id: u64,
    params: &Parameters,
    reference: UnixTime,
    run_interval: u64,
    first_pass: bool,
) -> Result<Demand, EnforcerError> {
    let scope = ZoneScope::Zone(zone_id);
    let keys = params.keys(keytype);
    let required = match keytype {
        KeyType::Zsk => usize::try_from(keys.standby)
            .unwrap_or(usize::MAX)
            .saturating_add(1),
        _ => 1,
    };
    let horizon = params
        .publication_interval(keytype)
        .saturating_add(run_interval);
    let pending = count_pending_retirement(store, keytype, reference, horizon, scope)?;
    let mut available = count_available(store, keytype, scope)?.saturating_sub(pending);
    if keytype == KeyType::Ksk && params.ds_driven() && !first_pass {
        let quota = usize::try_from(keys.standby).unwrap_or(usize::MAX);
        available += count_standby(store, scope)?.saturating_sub(quota);
    }
    Ok(Demand {
        required,
        available,
        pending,
        new: required.saturating_sub(available),
    })
}

/// Number of additional KSKs needed to fill the standby quota.
pub fn standby_shortfall<S: Storage + ?Sized>(
    store: &S,
    zone_id: u64,
    params: &Parameters,
) -> Result<usize, EnforcerError> {
    let quota = usize::try_from(params.ksk.standby).unwrap_or(usize::MAX);
    Ok(quota.saturating_sub(count_standby(store, ZoneScope::Zone(zone_id))?))
}

/// Predicts how many keys a zone will take out of Generate over an interval.
///
/// This is the current shortfall plus one key for every lifetime ending
/// within the interval plus, for KSKs, the missing standby keys. Keys
/// already allocated to the zone in Generate are subtracted.
pub fn predict_keys_needed_over_interval<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    zone_id: u64,
    interval: u64,
    reference: UnixTime,
    params: &Parameters,
    run_interval: u64,
) -> Result<usize, EnforcerError> {
    let scope = ZoneScope::Zone(zone_id);
    let first_pass = is_first_pass(store, keytype, scope)?;
    let mut needed = demand(
        store,
        keytype,
        zone_id,
        params,
        reference,
        run_interval,
        first_pass,
    )?
    .new;
    let lifetime = params.keys(keytype).lifetime;
    if lifetime != 0 {
        needed += usize::try_from(interval.div_ceil(lifetime)).unwrap_or(usize::MAX);
    }
    if keytype == KeyType::Ksk {
        needed += standby_shortfall(store, zone_id, params)?;
    }
    let allocated = count_in_state(store, keytype, KeyState::Generate, scope)?;
    Ok(needed.saturating_sub(allocated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::policy::tests::test_parameters;
    use crate::enforcer::query::Assignment;
    use crate::enforcer::store::tests::{add_pool_key, add_zone_key, test_store};

    const T0: u64 = 10_000_000;

    #[test]
    fn counts() {
        let mut store = test_store();
        add_zone_key(&mut store, KeyType::Zsk, KeyState::Publish, T0);
        add_zone_key(&mut store, KeyType::Zsk, KeyState::Active, T0);
        add_zone_key(&mut store, KeyType::Zsk, KeyState::Dead, T0);
        add_zone_key(&mut store, KeyType::Ksk, KeyState::DsSub, T0);
        add_zone_key(&mut store, KeyType::Ksk, KeyState::DsReady, T0);
        add_pool_key(&mut store, KeyType::Zsk);

        let zone = ZoneScope::Zone(1);
        assert_eq!(count_available(&store, KeyType::Zsk, zone).unwrap(), 2);
        assert_eq!(count_standby(&store, zone).unwrap(), 2);
        assert_eq!(
            count_in_state(&store, KeyType::Zsk, KeyState::Dead, zone).unwrap(),
            1
        );
        assert_eq!(
            count_in_state(&store, KeyType::Zsk, KeyState::Generate, ZoneScope::All).unwrap(),
            0
        );
        assert!(!is_first_pass(&store, KeyType::Zsk, zone).unwrap());
        assert!(!is_first_pass(&store, KeyType::Ksk, zone).unwrap());
        assert!(is_first_pass(&store, KeyType::Zsk, ZoneScope::Zone(2)).unwrap());
    }

    #[test]
    fn pending_retirement_and_remaining() {
        let mut store = test_store();
        let id = add_zone_key(&mut store, KeyType::Zsk, KeyState::Active, T0);
        store
            .update_keys(
                &[Assignment::date(
                    KeyState::Retire,
                    Some(UnixTime::from_secs(T0 + 1000)),
                )],
                &Filter::new().ids(&[id]),
            )
            .unwrap();
        let zone = ZoneScope::Zone(1);
        let now = UnixTime::from_secs(T0);
        assert_eq!(
            count_pending_retirement(&store, KeyType::Zsk, now, 999, zone).unwrap(),
            0
        );
        assert_eq!(
            count_pending_retirement(&store, KeyType::Zsk, now, 1000, zone).unwrap(),
            1
        );
        assert_eq!(
            count_active_remaining(&store, KeyType::Zsk, now, zone).unwrap(),
            1
        );
        assert_eq!(
            count_active_remaining(&store, KeyType::Zsk, now.add_secs(1000), zone).unwrap(),
            0
        );
    }

    #[test]
    fn infinite_lifetime_remains_active() {
        let mut store = test_store();
        add_zone_key(&mut store, KeyType::Zsk, KeyState::Active, T0);
        let now = UnixTime::from_secs(u64::MAX / 4);
        assert_eq!(
            count_active_remaining(&store, KeyType::Zsk, now, ZoneScope::Zone(1)).unwrap(),
            1
        );
    }

    #[test]
    fn demand_for_empty_zone() {
        let store = test_store();
        let mut params = test_parameters();
        params.zsk.standby = 1;
        let d = demand(
            &store,
            KeyType::Zsk,
            1,
            &params,
            UnixTime::from_secs(T0),
            3600,
            true,
        )
        .unwrap();
        assert_eq!(
            d,
            Demand {
                required: 2,
                available: 0,
                pending: 0,
                new: 2
            }
        );
    }

    #[test]
    fn demand_replaces_retiring_key() {
        let mut store = test_store();
        let params = test_parameters();
        let id = add_zone_key(&mut store, KeyType::Zsk, KeyState::Active, T0);
        store
            .update_keys(
                &[Assignment::date(
                    KeyState::Retire,
                    Some(UnixTime::from_secs(T0 + 5000)),
                )],
                &Filter::new().ids(&[id]),
            )
            .unwrap();
        let now = UnixTime::from_secs(T0);
        // Retirement lies beyond publication interval plus run interval.
        let d = demand(&store, KeyType::Zsk, 1, &params, now, 0, false).unwrap();
        assert_eq!(d.new, 0);
        // Within the horizon once the run interval is added.
        let d = demand(&store, KeyType::Zsk, 1, &params, now, 3600, false).unwrap();
        assert_eq!((d.pending, d.new), (1, 1));
    }

    #[test]
    fn ds_pipeline_counts_for_ksk() {
        let mut store = test_store();
        let params = test_parameters();
        add_zone_key(&mut store, KeyType::Ksk, KeyState::Active, T0);
        add_zone_key(&mut store, KeyType::Ksk, KeyState::DsSub, T0);
        store
            .update_keys(
                &[Assignment::date(KeyState::Retire, Some(UnixTime::from_secs(T0)))],
                &Filter::new().state(KeyState::Active),
            )
            .unwrap();
        let now = UnixTime::from_secs(T0 + 1);
        let d = demand(&store, KeyType::Ksk, 1, &params, now, 0, false).unwrap();
        assert_eq!((d.pending, d.available, d.new), (1, 1, 0));
    }

    #[test]
    fn candidates_in_order() {
        let mut store = test_store();
        let mut params = test_parameters();
        let pool = add_pool_key(&mut store, KeyType::Zsk);
        let own = add_zone_key(&mut store, KeyType::Zsk, KeyState::Generate, T0);
        add_pool_key(&mut store, KeyType::Ksk);
        let zone = store.zone(1).unwrap().unwrap();
        let ids: Vec<_> = generate_candidates(&store, KeyType::Zsk, &zone, &params)
            .unwrap()
            .into_iter()
            .map(|k| k.keypair_id)
            .collect();
        assert_eq!(ids, vec![own, pool]);

        // A key of another zone becomes a candidate when shared.
        let other = store
            .add_zone(Zone {
                id: 0,
                name: "example.org".into(),
                policy_id: 1,
                signconf: None,
                roll_ksk_now: false,
                roll_zsk_now: false,
            })
            .unwrap();
        store.allocate(pool, other).unwrap();
        let supply = |params: &Parameters| {
            generate_candidates(&store, KeyType::Zsk, &zone, params)
                .unwrap()
                .into_iter()
                .map(|k| k.keypair_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(supply(&params), vec![own]);
        params.share_keys = true;
        assert_eq!(supply(&params), vec![own, pool]);
    }

    #[test]
    fn shared_keys_come_before_pool() {
        let mut store = test_store();
        let mut params = test_parameters();
        params.share_keys = true;
        let used = add_zone_key(&mut store, KeyType::Zsk, KeyState::Active, T0);
        add_zone_key(&mut store, KeyType::Zsk, KeyState::Dead, T0);
        let pool = add_pool_key(&mut store, KeyType::Zsk);
        let other = store
            .add_zone(Zone {
                id: 0,
                name: "example.org".into(),
                policy_id: 1,
                signconf: None,
                roll_ksk_now: false,
                roll_zsk_now: false,
            })
            .unwrap();
        let zone = store.zone(other).unwrap().unwrap();
        let ids: Vec<_> = generate_candidates(&store, KeyType::Zsk, &zone, &params)
            .unwrap()
            .into_iter()
            .map(|k| k.keypair_id)
            .collect();
        // Dead keys are not taken up again.
        assert_eq!(ids, vec![used, pool]);
    }

    #[test]
    fn prediction() {
        let mut store = test_store();
        let mut params = test_parameters();
        params.ksk.standby = 1;
        let now = UnixTime::from_secs(T0);

        // Empty zone: one key now, one per 30 days for 60 days.
        let n = predict_keys_needed_over_interval(
            &store,
            KeyType::Zsk,
            1,
            60 * 86400,
            now,
            &params,
            3600,
        )
        .unwrap();
        assert_eq!(n, 3);

        // KSK: one now, one per year, one standby.
        let n = predict_keys_needed_over_interval(
            &store,
            KeyType::Ksk,
            1,
            86400,
            now,
            &params,
            3600,
        )
        .unwrap();
        assert_eq!(n, 3);

        add_zone_key(&mut store, KeyType::Zsk, KeyState::Generate, T0);
        let n = predict_keys_needed_over_interval(
            &store,
            KeyType::Zsk,
            1,
            60 * 86400,
            now,
            &params,
            3600,
        )
        .unwrap();
        assert_eq!(n, 2);

        params.zsk.lifetime = 0;
        let n = predict_keys_needed_over_interval(
            &store,
            KeyType::Zsk,
            1,
            60 * 86400,
            now,
            &params,
            3600,
        )
        .unwrap();
        assert_eq!(n, 0);
    }
}
