//! Estimating when keys make their next transition.
//!
//! For every key the estimator takes the time the key entered its current
//! state, adds the delay the policy prescribes for that state, and stores
//! the result in the column of the state the key will move to next. The
//! transition engine compares these estimates with the reference time.
//!
//! An estimate is never written for a key with its `fixed_date` flag set.
//! That flag marks an estimate an operator set by hand.

use tracing::{debug, warn};

use super::error::{EnforcerError, Warning};
use super::key::{KeyState, KeyType};
use super::policy::Parameters;
use super::query::{Assignment, Column, Compare, Filter, Predicate, ZoneScope};
use super::store::Storage;
use super::time::UnixTime;

//------------ Estimate ------------------------------------------------------

/// The predicted next transition of a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Estimate {
    /// The state whose column receives the estimate.
    pub column: KeyState,

    /// When the transition happens. `None` means never.
    pub time: Option<UnixTime>,
}

/// Computes the next transition of a key.
///
/// Returns `None` for states that are not left on a timer: Generate,
/// Ready, DSSub, DSReady and Dead.
pub fn estimate(
    state: KeyState,
    keytype: KeyType,
    entered: UnixTime,
    params: &Parameters,
) -> Option<Estimate> {
    let (column, delay) = match state {
        KeyState::Publish => (KeyState::Ready, Some(params.publication_interval(keytype))),
        KeyState::Active => {
            let lifetime = params.keys(keytype).lifetime;
            (KeyState::Retire, (lifetime != 0).then_some(lifetime))
        }
        KeyState::Retire => {
            let delay = match keytype {
                KeyType::Zsk => params
                    .zsk_signature_lifetime
                    .saturating_add(params.propagation_delay)
                    .saturating_add(params.retire_safety),
                KeyType::Ksk | KeyType::Csk => params
                    .ksk_ttl
                    .saturating_add(params.ksk_propagation_delay)
                    .saturating_add(params.retire_safety),
            };
            (KeyState::Dead, Some(delay))
        }
        KeyState::DsPublish => (KeyState::DsReady, Some(params.ds_interval())),
        KeyState::KeyPublish => (KeyState::Active, Some(params.ipc())),
        KeyState::Generate
        | KeyState::Ready
        | KeyState::Dead
        | KeyState::DsSub
        | KeyState::DsReady => return None,
    };
    Some(Estimate {
        column,
        time: delay.map(|delay| entered.add_secs(delay)),
    })
}

/// Refreshes the estimates of all keys of a policy within the scope.
///
/// Keys with an unknown state are skipped and reported as warnings.
pub fn update_key_times<S: Storage + ?Sized>(
    store: &mut S,
    policy_id: u64,
    scope: ZoneScope,
    params: &Parameters,
) -> Result<Vec<Warning>, EnforcerError> {
    let mut warnings = Vec::new();
    let keys = store.keys(&Filter::new().policy(policy_id).zone(scope))?;
    for key in keys {
        let Some(zone_id) = key.zone_id else {
            continue;
        };
        let Some(state) = key.state() else {
            warn!(
                "key {} in zone {zone_id} has unknown state {}, skipped",
                key.keypair_id, key.state_code
            );
            warnings.push(Warning::UnknownKeyState {
                keypair_id: key.keypair_id,
                code: key.state_code,
            });
            continue;
        };
        if key.fixed_date {
            debug!("key {} has a fixed date, not estimated", key.keypair_id);
            continue;
        }
        let Some(entered) = key.dates.get(state) else {
            continue;
        };
        let Some(next) = estimate(state, key.keytype, entered, params) else {
            continue;
        };
        store.update_keys(
            &[Assignment::date(next.column, next.time)],
            &Filter::new()
                .ids(&[key.keypair_id])
                .zone(ZoneScope::Zone(zone_id))
                .and(Predicate::Compare(Column::FixedDate, Compare::Eq, 0)),
        )?;
    }
    Ok(warnings)
}
