use crate::datastore::Datastore;
use crate::enforcer::operator::request_rollover;
use crate::enforcer::{KeyType, Storage, Zone};
use crate::env::Env;
use crate::error::Error;
use crate::parse::parse_zone_name;

#[derive(Clone, Debug, PartialEq, Eq, clap::Subcommand)]
pub enum ZoneCommands {
    /// Put a zone under enforcement
    Add {
        /// The zone name
        #[arg(value_parser = parse_zone_name)]
        name: String,

        /// The policy for the zone
        #[arg(long, short = 'p', default_value = "default")]
        policy: String,

        /// Where the signer configuration of the zone goes
        #[arg(long)]
        signconf: Option<String>,
    },

    /// List all zones
    List,

    /// Roll the keys of a zone at the next enforcement run
    Rollover {
        /// The zone name
        #[arg(value_parser = parse_zone_name)]
        name: String,

        /// The type of key to roll
        #[arg(long, short = 't', value_enum)]
        keytype: KeyType,
    },
}

impl ZoneCommands {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        match self {
            Self::Add {
                name,
                policy,
                signconf,
            } => {
                let policy_id = ds
                    .store
                    .policies()?
                    .into_iter()
                    .find(|p| p.name == policy)
                    .map(|p| p.id)
                    .ok_or_else(|| format!("policy {policy} not found"))?;
                ds.store.add_zone(Zone {
                    id: 0,
                    name: name.clone(),
                    policy_id,
                    signconf,
                    roll_ksk_now: false,
                    roll_zsk_now: false,
                })?;
                writeln!(env.stdout(), "zone {name} added with policy {policy}");
                Ok(true)
            }
            Self::List => {
                let mut out = env.stdout();
                for zone in ds.store.zones(None)? {
                    let policy = ds
                        .store
                        .policy(zone.policy_id)?
                        .map(|p| p.name)
                        .unwrap_or_default();
                    let mut flags = Vec::new();
                    if zone.roll_ksk_now {
                        flags.push("KSK rollover requested");
                    }
                    if zone.roll_zsk_now {
                        flags.push("ZSK rollover requested");
                    }
                    writeln!(out, "{:<24} {policy:<16} {}", zone.name, flags.join(", "));
                }
                Ok(false)
            }
            Self::Rollover { name, keytype } => {
                request_rollover(&mut ds.store, &name, keytype)?;
                writeln!(
                    env.stdout(),
                    "{keytype} rollover of {name} scheduled for the next run"
                );
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::{ok, setup};

    #[test]
    fn add_list_rollover() {
        let (_dir, cmd) = setup();
        let res = ok(cmd.args(["zone", "add", "Example.ORG.", "-p", "default"]));
        assert_eq!(res.stdout, "zone example.org added with policy default\n");

        let res = cmd.args(["zone", "add", "example.net", "-p", "other"]).run();
        assert_eq!(res.exit_code, 1);
        assert!(res.stderr.contains("policy other not found"));

        let res = cmd.args(["zone", "add", "example.org"]).run();
        assert_eq!(res.exit_code, 1);

        ok(cmd.args(["zone", "rollover", "example.org", "-t", "zsk"]));
        let res = ok(cmd.args(["zone", "list"]));
        assert_eq!(
            res.stdout,
            "example.com              default          \n\
             example.org              default          ZSK rollover requested\n"
        );

        let res = cmd.args(["zone", "rollover", "example.org", "-t", "csk"]).run();
        assert_eq!(res.exit_code, 1);
    }
}
