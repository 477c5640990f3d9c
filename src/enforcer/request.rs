//! The enforcement pass.
//!
//! [`request_keys`] is the entry point. It refreshes all estimates, runs
//! the per zone state machine for KSKs and then ZSKs, refreshes the
//! estimates again and reports the keys that belong in each zone. All of
//! this happens in a single transaction: an error rolls everything back.

use tracing::{debug, info, warn};

use super::count::{
    count_active_remaining, count_in_state, demand, is_first_pass, standby_shortfall,
};
use super::error::{EnforcerError, Warning};
use super::estimate::update_key_times;
use super::key::{Key, KeyState, KeyType, Zone};
use super::policy::Parameters;
use super::query::{Column, Filter, ZoneScope};
use super::store::{Storage, Transaction};
use super::time::UnixTime;
use super::transition::{
    active_keys, advance_demand_gated, advance_time_gated, retire_keys, stamp_retire, Moved,
};

//------------ KeyTypeFilter -------------------------------------------------

/// Which key types a pass handles.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum KeyTypeFilter {
    Ksk,
    Zsk,
    #[default]
    Both,
}

impl KeyTypeFilter {
    /// The key types in processing order.
    pub fn keytypes(self) -> &'static [KeyType] {
        match self {
            KeyTypeFilter::Ksk => &[KeyType::Ksk],
            KeyTypeFilter::Zsk => &[KeyType::Zsk],
            KeyTypeFilter::Both => &[KeyType::Ksk, KeyType::Zsk],
        }
    }
}

//------------ Request -------------------------------------------------------

/// The options of an enforcement pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Request {
    pub keytypes: KeyTypeFilter,

    /// Roll the active keys now regardless of their lifetime.
    pub force_rollover: bool,

    /// The time the pass acts at.
    pub reference: UnixTime,

    pub scope: ZoneScope,
    pub policy_id: u64,

    /// Seconds until the next pass, at the latest.
    pub run_interval: u64,
}

/// The result of an enforcement pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestOutcome {
    /// The keys each zone must publish or sign with, by zone and key type.
    pub issued: Vec<Key>,

    /// The DS records at the parent of some zone need to change.
    pub new_ds: bool,

    pub warnings: Vec<Warning>,
}

/// Runs an enforcement pass.
pub fn request_keys<S: Storage + ?Sized>(
    store: &mut S,
    request: &Request,
) -> Result<RequestOutcome, EnforcerError> {
    let params = Parameters::load(&*store, request.policy_id)?;
    let mut txn = Transaction::begin(store)?;
    let zones = match request.scope {
        ZoneScope::Zone(id) => {
            let zone = txn
                .zone(id)?
                .ok_or_else(|| EnforcerError::ZoneNotFound(id.to_string()))?;
            if zone.policy_id != request.policy_id {
                return Err(EnforcerError::ZoneNotFound(format!(
                    "{} in policy {}",
                    zone.name, request.policy_id
                )));
            }
            vec![zone]
        }
        ZoneScope::All => txn.zones(Some(request.policy_id))?,
    };

    let mut outcome = RequestOutcome {
        warnings: update_key_times(&mut *txn, request.policy_id, request.scope, &params)?,
        ..Default::default()
    };
    for mut zone in zones.iter().cloned() {
        for &keytype in request.keytypes.keytypes() {
            let res = request_keys_by_type(&mut *txn, &mut zone, keytype, &params, request)?;
            outcome.new_ds |= res.new_ds;
            outcome.warnings.extend(res.warnings);
        }
    }
    // Unknown states have been reported by the first round already.
    update_key_times(&mut *txn, request.policy_id, request.scope, &params)?;

    for zone in &zones {
        for &keytype in request.keytypes.keytypes() {
            outcome
                .issued
                .extend(issued_keys(&*txn, keytype, ZoneScope::Zone(zone.id))?);
        }
    }
    txn.commit()?;
    if outcome.new_ds {
        info!("DS records at the parent need to be updated");
    }
    Ok(outcome)
}

/// The keys to include in a zone: Publish, Ready, Active, Retire and
/// KeyPublish.
pub fn issued_keys<S: Storage + ?Sized>(
    store: &S,
    keytype: KeyType,
    scope: ZoneScope,
) -> Result<Vec<Key>, EnforcerError> {
    store.keys(
        &Filter::new()
            .keytype(keytype)
            .zone(scope)
            .states(&KeyState::ISSUED)
            .order_by(Column::KeyId),
    )
}

//------------ TypeOutcome ---------------------------------------------------

/// The result of processing one key type of one zone.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TypeOutcome {
    pub new_ds: bool,
    pub warnings: Vec<Warning>,
}

/// Runs the state machine for one key type of one zone.
///
/// The caller is responsible for the transaction and for refreshing the
/// estimates before and after.
pub fn request_keys_by_type<S: Storage + ?Sized>(
    store: &mut S,
    zone: &mut Zone,
    keytype: KeyType,
    params: &Parameters,
    request: &Request,
) -> Result<TypeOutcome, EnforcerError> {
    if keytype == KeyType::Csk {
        return Err(EnforcerError::InvalidKeyType(keytype));
    }
    let first_pass = is_first_pass(&*store, keytype, ZoneScope::Zone(zone.id))?;
    let rollover = request.force_rollover || zone.roll_now(keytype);
    let mut pass = ZonePass {
        store,
        zone,
        keytype,
        params,
        reference: request.reference,
        run_interval: request.run_interval,
        first_pass,
        rollover,
        outcome: TypeOutcome::default(),
    };
    pass.run()?;
    Ok(pass.outcome)
}

//------------ ZonePass ------------------------------------------------------

struct ZonePass<'a, S: Storage + ?Sized> {
    store: &'a mut S,
    zone: &'a mut Zone,
    keytype: KeyType,
    params: &'a Parameters,
    reference: UnixTime,
    run_interval: u64,
    first_pass: bool,
    rollover: bool,
    outcome: TypeOutcome,
}

impl<S: Storage + ?Sized> ZonePass<'_, S> {
    fn scope(&self) -> ZoneScope {
        ZoneScope::Zone(self.zone.id)
    }

    fn is_ksk(&self) -> bool {
        self.keytype == KeyType::Ksk
    }

    fn run(&mut self) -> Result<(), EnforcerError> {
        debug!(
            "zone {}: {} pass at {}{}{}",
            self.zone.name,
            self.keytype,
            self.reference,
            if self.first_pass { ", first pass" } else { "" },
            if self.rollover { ", rollover" } else { "" },
        );

        // Make the active keys due so they are replaced below.
        if self.rollover {
            stamp_retire(self.store, self.keytype, self.zone.id, self.reference)?;
        }

        if self.is_ksk() {
            self.activate_published()?;
        }

        let moved = self.time_gated(KeyState::Retire, KeyState::Dead)?;
        self.outcome.new_ds |= moved.new_ds;

        if !self.is_ksk() || !self.params.ds_driven() || self.first_pass {
            let moved = self.time_gated(KeyState::Publish, KeyState::Ready)?;
            self.outcome.new_ds |= moved.new_ds;
        }

        if self.is_ksk() {
            self.time_gated(KeyState::DsPublish, KeyState::DsReady)?;
            self.provision_standby()?;
        }

        self.provision()?;

        let remaining =
            count_active_remaining(&*self.store, self.keytype, self.reference, self.scope())?;
        if remaining > 0 && !self.rollover {
            return Ok(());
        }

        let ready = count_in_state(&*self.store, self.keytype, KeyState::Ready, self.scope())?;
        if ready == 0 {
            if self.first_pass {
                if self.is_ksk() {
                    debug!(
                        "zone {}: first KSK waits for its DS to be seen",
                        self.zone.name
                    );
                } else {
                    let scope = self.scope();
                    if count_in_state(&*self.store, self.keytype, KeyState::Publish, scope)? > 0 {
                        self.activate(KeyState::Publish)?;
                    }
                }
            } else {
                info!(
                    "zone {}: no ready {}, rollover deferred",
                    self.zone.name, self.keytype
                );
                if self.is_ksk() {
                    self.publish_standby()?;
                }
            }
            return Ok(());
        }

        if self.params.keys(self.keytype).manual_rollover && !self.rollover {
            info!(
                "zone {}: {} rollover is manual, waiting for a rollover request",
                self.zone.name, self.keytype
            );
            return Ok(());
        }

        if self.is_ksk() && self.params.ds_driven() {
            info!(
                "zone {}: ready KSK awaits submission of its DS to the parent",
                self.zone.name
            );
            return Ok(());
        }

        self.activate(KeyState::Ready)
    }

    fn time_gated(&mut self, src: KeyState, dst: KeyState) -> Result<Moved, EnforcerError> {
        advance_time_gated(
            self.store,
            self.keytype,
            src,
            dst,
            self.scope(),
            self.reference,
            self.params,
        )
    }

    /// Takes `count` keys out of Generate.
    ///
    /// A shortfall is reported as a warning and nothing is moved.
    fn promote_generated(&mut self, dst: KeyState, count: usize) -> Result<Moved, EnforcerError> {
        match advance_demand_gated(
            self.store,
            self.keytype,
            KeyState::Generate,
            dst,
            count,
            self.zone,
            self.reference,
            self.params,
        ) {
            Err(EnforcerError::InsufficientGeneratedKeys {
                needed, available, ..
            }) => {
                let shortfall = needed - available;
                warn!(
                    "zone {}: {shortfall} more generated {}(s) needed",
                    self.zone.name, self.keytype
                );
                self.outcome
                    .warnings
                    .push(Warning::InsufficientGeneratedKeys {
                        zone: self.zone.name.clone(),
                        keytype: self.keytype,
                        shortfall,
                    });
                Ok(Moved::default())
            }
            res => res,
        }
    }

    /// Keeps the quota of KSKs in the DS pipeline.
    fn provision_standby(&mut self) -> Result<(), EnforcerError> {
        let needed = standby_shortfall(&*self.store, self.zone.id, self.params)?;
        if needed > 0 {
            let moved = self.promote_generated(KeyState::DsSub, needed)?;
            self.outcome.new_ds |= !moved.is_empty() && !self.first_pass;
        }
        Ok(())
    }

    /// Makes sure enough keys are on their way to replace retiring ones.
    fn provision(&mut self) -> Result<(), EnforcerError> {
        let demand = demand(
            &*self.store,
            self.keytype,
            self.zone.id,
            self.params,
            self.reference,
            self.run_interval,
            self.first_pass,
        )?;
        debug!(
            "zone {}: {} required {}, available {}, retiring {}, new {}",
            self.zone.name,
            self.keytype,
            demand.required,
            demand.available,
            demand.pending,
            demand.new
        );
        if demand.new == 0 {
            return Ok(());
        }
        if self.is_ksk() && self.params.ds_driven() && !self.first_pass {
            let moved = self.promote_generated(KeyState::DsSub, demand.new)?;
            self.outcome.new_ds |= !moved.is_empty();
        } else {
            self.promote_generated(KeyState::Publish, demand.new)?;
        }
        Ok(())
    }

    /// Activates KSKs whose DNSKEY has been published long enough.
    fn activate_published(&mut self) -> Result<(), EnforcerError> {
        let old = active_keys(&*self.store, self.keytype, self.zone.id)?;
        match self.time_gated(KeyState::KeyPublish, KeyState::Active) {
            Ok(moved) if moved.is_empty() => Ok(()),
            Ok(moved) => {
                self.activated(&moved, &old)?;
                self.outcome.new_ds |= !self.first_pass;
                Ok(())
            }
            Err(EnforcerError::BackupRequired { keys, .. }) => {
                self.backup_required(keys);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Moves one DSReady KSK on to KeyPublish unless one is there already.
    fn publish_standby(&mut self) -> Result<(), EnforcerError> {
        let scope = self.scope();
        if count_in_state(&*self.store, self.keytype, KeyState::KeyPublish, scope)? > 0 {
            return Ok(());
        }
        if count_in_state(&*self.store, self.keytype, KeyState::DsReady, scope)? == 0 {
            debug!("zone {}: no KSK with a ready DS", self.zone.name);
            return Ok(());
        }
        advance_demand_gated(
            self.store,
            self.keytype,
            KeyState::DsReady,
            KeyState::KeyPublish,
            1,
            self.zone,
            self.reference,
            self.params,
        )?;
        Ok(())
    }

    /// Activates one key from `src` and retires the previously active keys.
    fn activate(&mut self, src: KeyState) -> Result<(), EnforcerError> {
        let old = active_keys(&*self.store, self.keytype, self.zone.id)?;
        match advance_demand_gated(
            self.store,
            self.keytype,
            src,
            KeyState::Active,
            1,
            self.zone,
            self.reference,
            self.params,
        ) {
            Ok(moved) => self.activated(&moved, &old),
            Err(EnforcerError::BackupRequired { keys, .. }) => {
                self.backup_required(keys);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Finishes the activation of replacement keys.
    fn activated(&mut self, moved: &Moved, old: &[u64]) -> Result<(), EnforcerError> {
        if !moved.unbacked.is_empty() {
            self.outcome.warnings.push(Warning::BackupMissing {
                zone: self.zone.name.clone(),
                keytype: self.keytype,
                keys: moved.unbacked.clone(),
            });
        }
        let retired = retire_keys(self.store, self.zone.id, old, self.reference)?;
        if retired > 0 {
            info!(
                "zone {}: retired {} {}(s) {old:?}",
                self.zone.name, retired, self.keytype
            );
        }
        self.rollover = false;
        if self.zone.roll_now(self.keytype) {
            self.zone.set_roll_now(self.keytype, false);
            self.store.update_zone(self.zone)?;
        }
        Ok(())
    }

    fn backup_required(&mut self, keys: Vec<u64>) {
        warn!(
            "zone {}: {} {keys:?} not activated, backup required",
            self.zone.name, self.keytype
        );
        self.outcome.warnings.push(Warning::BackupRequired {
            zone: self.zone.name.clone(),
            keytype: self.keytype,
            keys,
        });
    }
}
