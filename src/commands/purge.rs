use crate::datastore::Datastore;
use crate::enforcer::operator::find_zone;
use crate::enforcer::{purge_dead_keys, purge_expired, PurgeScope, Purged, Storage};
use crate::env::Env;
use crate::error::{bail, Error};
use crate::parse::parse_zone_name;

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Purge {
    /// Only purge the keys of this zone
    #[arg(long, short = 'z', value_parser = parse_zone_name, conflicts_with = "policy")]
    zone: Option<String>,

    /// Only purge the keys of this policy
    #[arg(long, short = 'p')]
    policy: Option<String>,

    /// Only purge keys that have been dead longer than their policy asks
    #[arg(long, conflicts_with = "zone")]
    expired: bool,
}

impl Purge {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        let mut total = Purged::default();
        if let Some(name) = &self.zone {
            let zone = find_zone(&ds.store, name)?;
            total = purge_dead_keys(&mut ds.store, &mut ds.hsm, PurgeScope::Zone(zone.id), None)?;
        } else {
            let mut policies = ds.store.policies()?;
            if let Some(name) = &self.policy {
                policies.retain(|p| &p.name == name);
                if policies.is_empty() {
                    bail!("policy {} not found", name);
                }
            }
            let now = ds.now(env);
            for policy in policies {
                let purged = if self.expired {
                    purge_expired(&mut ds.store, &mut ds.hsm, policy.id, now)?
                } else {
                    let scope = PurgeScope::Policy(policy.id);
                    purge_dead_keys(&mut ds.store, &mut ds.hsm, scope, None)?
                };
                total.instances += purged.instances;
                total.keypairs.extend(purged.keypairs);
            }
        }

        writeln!(
            env.stdout(),
            "{} dead key instance(s) removed, {} key(s) deleted",
            total.instances,
            total.keypairs.len()
        );
        Ok(total.instances > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::commands::tests::{ok, setup, state};

    /// Lets the key of the first zone instance die.
    fn kill_first_instance(dir: &Path) {
        let mut state = state(dir);
        let instance = &mut state["tables"]["dnsseckeys"][0];
        instance["state"] = 6.into();
        instance["dates"]["dead"] = 1_704_067_200.into();
        let json = serde_json::to_string_pretty(&state).unwrap();
        std::fs::write(dir.join("kasp.json"), json).unwrap();
    }

    #[test]
    fn purge_dead() {
        let (dir, cmd) = setup();
        ok(cmd.args(["generate", "--interval", "30d"]));
        ok(cmd.args(["enforce", "-t", "zsk"]));
        kill_first_instance(dir.path());

        let res = ok(cmd.args(["key", "list", "--all"]));
        assert!(res.stdout.contains("ZSK  dead"), "{}", res.stdout);
        let res = ok(cmd.args(["key", "list"]));
        assert!(!res.stdout.contains("dead"));

        // No purge delay in the policy.
        let res = ok(cmd.args(["purge", "--expired"]));
        assert_eq!(res.stdout, "0 dead key instance(s) removed, 0 key(s) deleted\n");

        let res = ok(cmd.args(["purge", "--zone", "example.com"]));
        assert_eq!(res.stdout, "1 dead key instance(s) removed, 1 key(s) deleted\n");
        let state = state(dir.path());
        assert!(state["tables"]["dnsseckeys"].as_array().unwrap().is_empty());
        assert_eq!(state["tables"]["keypairs"].as_array().unwrap().len(), 3);
        assert_eq!(state["hsm"]["keys"].as_object().unwrap().len(), 3);

        let res = ok(cmd.args(["purge"]));
        assert_eq!(res.stdout, "0 dead key instance(s) removed, 0 key(s) deleted\n");
    }

    #[test]
    fn conflicting_scopes() {
        let (_dir, cmd) = setup();
        let res = cmd
            .args(["purge", "--zone", "example.com", "--policy", "default"])
            .run();
        assert_eq!(res.exit_code, 2);
        let res = cmd.args(["purge", "--policy", "other"]).run();
        assert_eq!(res.exit_code, 1);
    }
}
