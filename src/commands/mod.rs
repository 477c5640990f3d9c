//! The commands of _kasp_.
pub mod enforce;
pub mod generate;
pub mod key;
pub mod policy;
pub mod purge;
pub mod repository;
pub mod set;
pub mod zone;

use std::path::Path;

use crate::datastore::Datastore;
use crate::enforcer::{Key, Storage};
use crate::env::Env;
use crate::error::{Context, Error};

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Create an empty datastore
    Create,

    /// Import and list key and signing policies
    Policy {
        #[command(subcommand)]
        subcommand: policy::PolicyCommands,
    },

    /// Manage the repositories keys are kept in
    Repository {
        #[command(subcommand)]
        subcommand: repository::RepositoryCommands,
    },

    /// Manage the zones under enforcement
    Zone {
        #[command(subcommand)]
        subcommand: zone::ZoneCommands,
    },

    /// Run the enforcer over the zones
    ///
    /// Moves every key along its lifecycle as far as time and demand
    /// allow and prints the keys each zone has to publish.
    Enforce(enforce::Enforce),

    /// Inspect keys and report what happened to them at the parent
    Key {
        #[command(subcommand)]
        subcommand: key::KeyCommands,
    },

    /// Report on backups of repositories
    Backup {
        #[command(subcommand)]
        subcommand: repository::BackupCommands,
    },

    /// Generate the keys the zones will need in advance
    Generate(generate::Generate),

    /// Remove dead keys
    Purge(purge::Purge),

    /// Change enforcer settings
    Set {
        #[command(subcommand)]
        subcommand: set::SetCommands,
    },

    /// Show the enforcer settings
    Show,
}

impl Command {
    pub fn execute(self, env: impl Env, path: &Path) -> Result<(), Error> {
        if let Self::Create = self {
            Datastore::create(&env, path)?;
            writeln!(env.stdout(), "created {}", path.display());
            return Ok(());
        }

        let mut ds = Datastore::open(&env, path)
            .with_context(|| format!("opening datastore {}", path.display()))?;
        let changed = match self {
            Self::Create => false,
            Self::Policy { subcommand } => subcommand.execute(&env, &mut ds)?,
            Self::Repository { subcommand } => subcommand.execute(&env, &mut ds)?,
            Self::Zone { subcommand } => subcommand.execute(&env, &mut ds)?,
            Self::Enforce(enforce) => enforce.execute(&env, &mut ds)?,
            Self::Key { subcommand } => subcommand.execute(&env, &mut ds)?,
            Self::Backup { subcommand } => subcommand.execute(&env, &mut ds)?,
            Self::Generate(generate) => generate.execute(&env, &mut ds)?,
            Self::Purge(purge) => purge.execute(&env, &mut ds)?,
            Self::Set { subcommand } => subcommand.execute(&env, &mut ds)?,
            Self::Show => {
                set::show(&env, &ds);
                false
            }
        };
        if changed {
            ds.save()?;
        }
        Ok(())
    }
}

/// Print keys as a table.
fn print_keys(env: &impl Env, store: &impl Storage, keys: &[Key]) -> Result<(), Error> {
    let mut out = env.stdout();
    writeln!(
        out,
        "{:<24} {:<4} {:<10} {:>5} {:>3} Since",
        "Zone", "Type", "State", "Id", "Alg"
    );
    let mut zone_names: Vec<(u64, String)> = Vec::new();
    for key in keys {
        let zone = match key.zone_id {
            Some(id) => match zone_names.iter().find(|(zone_id, _)| *zone_id == id) {
                Some((_, name)) => name.clone(),
                None => {
                    let name = store
                        .zone(id)?
                        .map(|zone| zone.name)
                        .unwrap_or_else(|| id.to_string());
                    zone_names.push((id, name.clone()));
                    name
                }
            },
            None => "(pool)".into(),
        };
        let state = match key.state() {
            Some(state) => state.to_string(),
            None => format!("unknown({})", key.state_code),
        };
        let since = key
            .state()
            .and_then(|state| key.dates.get(state))
            .map(|time| time.to_string())
            .unwrap_or_else(|| "-".into());
        writeln!(
            out,
            "{zone:<24} {:<4} {state:<10} {:>5} {:>3} {since}",
            key.keytype.to_string(),
            key.keypair_id,
            key.algorithm
        );
    }
    Ok(())
}
