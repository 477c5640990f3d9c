use crate::datastore::Datastore;
use crate::enforcer::{generate_keys, Storage};
use crate::env::Env;
use crate::error::{bail, Context, Error};
use crate::parse::parse_duration;

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Generate {
    /// Only generate keys for this policy
    #[arg(long, short = 'p')]
    policy: Option<String>,

    /// Generate keys for this long [default: the configured interval]
    #[arg(long, short = 'i', value_parser = parse_duration)]
    interval: Option<u64>,
}

impl Generate {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        let mut policies = ds.store.policies()?;
        if let Some(name) = &self.policy {
            policies.retain(|p| &p.name == name);
            if policies.is_empty() {
                bail!("policy {} not found", name);
            }
        }
        let interval = self.interval.unwrap_or(ds.config.key_gen_interval);
        let now = ds.now(env);

        let mut changed = false;
        for policy in policies {
            let keys = generate_keys(
                &mut ds.store,
                &mut ds.hsm,
                policy.id,
                interval,
                now,
                ds.config.run_interval,
            )
            .with_context(|| format!("generating keys for policy {}", policy.name))?;
            writeln!(
                env.stdout(),
                "{:<16} {} key(s) generated",
                policy.name,
                keys.len()
            );
            changed |= !keys.is_empty();
        }
        Ok(changed)
    }
}
