//! Filling the key pool.

use tracing::{debug, info, warn};

use super::count::predict_keys_needed_over_interval;
use super::error::EnforcerError;
use super::hsm::KeyMaterial;
use super::key::{KeyPair, KeyType};
use super::policy::Parameters;
use super::query::{Column, Filter, Predicate};
use super::store::{Storage, Transaction};
use super::time::UnixTime;

/// Generates the keys a policy will need over the next `interval` seconds.
///
/// The prediction is made per zone and added up. With shared keys, all
/// zones draw from the same keys and the largest prediction is used
/// instead. Keys already waiting in the pool are subtracted. New keys go
/// into the pool of the policy.
///
/// On failure, the key material created so far is deleted again.
///
/// Returns the new key pairs.
pub fn generate_keys<S, H>(
    store: &mut S,
    hsm: &mut H,
    policy_id: u64,
    interval: u64,
    reference: UnixTime,
    run_interval: u64,
) -> Result<Vec<KeyPair>, EnforcerError>
where
    S: Storage + ?Sized,
    H: KeyMaterial + ?Sized,
{
    let mut created = Vec::new();
    let res = fill_pool(
        store,
        hsm,
        policy_id,
        interval,
        reference,
        run_interval,
        &mut created,
    );
    if res.is_err() {
        for locator in created {
            if let Err(err) = hsm.delete_key(&locator) {
                warn!("cannot delete orphaned key material {locator}: {err}");
            }
        }
    }
    res
}

/// Does the work of [`generate_keys`], recording new locators in `created`.
fn fill_pool<S, H>(
    store: &mut S,
    hsm: &mut H,
    policy_id: u64,
    interval: u64,
    reference: UnixTime,
    run_interval: u64,
    created: &mut Vec<String>,
) -> Result<Vec<KeyPair>, EnforcerError>
where
    S: Storage + ?Sized,
    H: KeyMaterial + ?Sized,
{
    let params = Parameters::load(&*store, policy_id)?;
    let mut txn = Transaction::begin(store)?;
    let zones = txn.zones(Some(policy_id))?;
    let mut res = Vec::new();
    for keytype in [KeyType::Ksk, KeyType::Zsk] {
        let mut needed = 0usize;
        for zone in &zones {
            let n = predict_keys_needed_over_interval(
                &*txn,
                keytype,
                zone.id,
                interval,
                reference,
                &params,
                run_interval,
            )?;
            debug!("zone {}: {n} {keytype}(s) needed", zone.name);
            needed = if params.share_keys {
                needed.max(n)
            } else {
                needed.saturating_add(n)
            };
        }
        let pool = txn.count_keys(
            &Filter::new()
                .keytype(keytype)
                .policy(policy_id)
                .and(Predicate::IsNull(Column::ZoneId)),
        )?;
        let missing = needed.saturating_sub(pool);
        if missing == 0 {
            debug!("{pool} {keytype}(s) in the pool, no new keys needed");
            continue;
        }
        res.extend(generate(
            &mut *txn, hsm, keytype, &params, policy_id, missing, reference, created,
        )?);
    }
    txn.commit()?;
    Ok(res)
}

/// Generates `count` keys of a type into the pool.
#[allow(clippy::too_many_arguments)]
fn generate<S, H>(
    store: &mut S,
    hsm: &mut H,
    keytype: KeyType,
    params: &Parameters,
    policy_id: u64,
    count: usize,
    reference: UnixTime,
    created: &mut Vec<String>,
) -> Result<Vec<KeyPair>, EnforcerError>
where
    S: Storage + ?Sized,
    H: KeyMaterial + ?Sized,
{
    let keys = params.keys(keytype);
    let repository = store
        .repository_by_name(&keys.repository)?
        .ok_or_else(|| EnforcerError::RepositoryNotFound(keys.repository.clone()))?;
    let mut res = Vec::with_capacity(count);
    for _ in 0..count {
        let locator = hsm.generate_key(&repository, keys.algorithm, keys.bits)?;
        created.push(locator.clone());
        let mut pair = KeyPair {
            id: 0,
            locator,
            keytype,
            algorithm: keys.algorithm,
            bits: keys.bits,
            repository_id: repository.id,
            policy_id,
            generate: reference,
            backup: None,
        };
        pair.id = store.insert_keypair(pair.clone())?;
        res.push(pair);
    }
    info!(
        "generated {count} {keytype}(s) in repository {}",
        repository.name
    );
    Ok(res)
}
