use std::path::PathBuf;

use tracing::info;

use crate::datastore::Datastore;
use crate::enforcer::{PolicySpec, Storage};
use crate::env::Env;
use crate::error::{Context, Error};

#[derive(Clone, Debug, PartialEq, Eq, clap::Subcommand)]
pub enum PolicyCommands {
    /// Import a policy from a JSON file
    ///
    /// A policy with the same name is replaced. Durations may be given in
    /// seconds or as spans such as "1h" or "30 days".
    Import {
        /// The policy file
        file: PathBuf,
    },

    /// List all policies
    List,
}

impl PolicyCommands {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        match self {
            Self::Import { file } => {
                let json = std::fs::read_to_string(env.in_cwd(&file))
                    .map_err(|e| format!("unable to read {}: {e}", file.display()))?;
                let spec: PolicySpec = serde_json::from_str(&json)
                    .map_err(|e| format!("invalid policy: {e}"))
                    .with_context(|| format!("importing {}", file.display()))?;
                let name = spec.name.clone();
                let policy = spec
                    .into_policy(0)
                    .with_context(|| format!("importing {}", file.display()))?;
                let id = ds.store.add_policy(policy);
                info!("imported policy {name} as {id}");
                writeln!(env.stdout(), "policy {name} imported");
                Ok(true)
            }
            Self::List => {
                let mut out = env.stdout();
                for policy in ds.store.policies()? {
                    let zones = ds.store.zones(Some(policy.id))?.len();
                    writeln!(
                        out,
                        "{:<16} {zones:>4} zone(s)  {}",
                        policy.name, policy.description
                    );
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::{ok, setup};

    #[test]
    fn import_and_list() {
        let (dir, cmd) = setup();
        let res = ok(cmd.args(["policy", "list"]));
        assert_eq!(
            res.stdout,
            "default             1 zone(s)  A policy for testing\n"
        );

        // Importing again replaces the policy.
        ok(cmd.args(["policy", "import", "policy.json"]));
        let res = ok(cmd.args(["policy", "list"]));
        assert_eq!(res.stdout.lines().count(), 1);

        std::fs::write(dir.path().join("bad.json"), r#"{"name": "x"}"#).unwrap();
        let res = cmd.args(["policy", "import", "bad.json"]).run();
        assert_eq!(res.exit_code, 1);
        assert!(res.stderr.contains("invalid policy"), "{res:?}");
        assert!(res.stderr.contains("while importing bad.json"), "{res:?}");
    }
}
