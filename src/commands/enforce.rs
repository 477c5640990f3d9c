use tracing::info;

use crate::datastore::Datastore;
use crate::enforcer::operator::find_zone;
use crate::enforcer::{
    purge_expired, request_keys, KeyTypeFilter, Request, Storage, UnixTime, ZoneScope,
};
use crate::env::Env;
use crate::error::{Context, Error};
use crate::parse::{parse_time, parse_zone_name};

use super::print_keys;

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Enforce {
    /// Only handle this zone
    #[arg(long, short = 'z', value_parser = parse_zone_name)]
    zone: Option<String>,

    /// Only handle these key types
    #[arg(long, short = 't', value_enum, default_value_t)]
    keytype: KeyTypeFilter,

    /// Roll the active keys now
    #[arg(long)]
    rollover: bool,

    /// Act as if it were this time
    #[arg(long, value_parser = parse_time)]
    time: Option<UnixTime>,
}

impl Enforce {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        let reference = self.time.unwrap_or_else(|| ds.now(env));
        let runs = match &self.zone {
            Some(name) => {
                let zone = find_zone(&ds.store, name)?;
                vec![(zone.policy_id, ZoneScope::Zone(zone.id))]
            }
            None => {
                let mut runs = Vec::new();
                for policy in ds.store.policies()? {
                    if !ds.store.zones(Some(policy.id))?.is_empty() {
                        runs.push((policy.id, ZoneScope::All));
                    }
                }
                runs
            }
        };

        let mut issued = Vec::new();
        let mut new_ds = false;
        let mut warnings = 0;
        for (policy_id, scope) in runs {
            let request = Request {
                keytypes: self.keytype,
                force_rollover: self.rollover,
                reference,
                scope,
                policy_id,
                run_interval: ds.config.run_interval,
            };
            let outcome = request_keys(&mut ds.store, &request)
                .with_context(|| format!("enforcing policy {policy_id}"))?;
            issued.extend(outcome.issued);
            new_ds |= outcome.new_ds;
            warnings += outcome.warnings.len();

            let purged = purge_expired(&mut ds.store, &mut ds.hsm, policy_id, reference)?;
            if !purged.keypairs.is_empty() {
                info!("purged expired keys {:?}", purged.keypairs);
            }
        }

        print_keys(env, &ds.store, &issued)?;
        if new_ds {
            writeln!(
                env.stdout(),
                "The DS records at the parent need to be updated."
            );
        }
        if warnings > 0 {
            let msg = format!("enforcement finished with {warnings} warning(s)");
            Error::warn(&msg).pretty_print(env);
        }
        Ok(true)
    }
}
