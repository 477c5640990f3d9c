//! The file the enforcer keeps its state in.
//!
//! A datastore is a single JSON file holding the configuration, all tables
//! of the engine and the soft key repository. A command opens it with an
//! exclusive lock that is held until the command is done and writes it
//! back by creating a new file and renaming it.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::enforcer::{MemoryStore, SoftHsm, Tables, UnixTime};
use crate::env::Env;
use crate::error::{Context, Error};
use crate::util;

/// Default time between two enforcement runs.
const DEFAULT_RUN_INTERVAL: u64 = 3600;

/// Default period to generate keys for in advance.
const DEFAULT_KEY_GEN_INTERVAL: u64 = 365 * 24 * 3600;

//------------ EnforcerConfig ------------------------------------------------

/// Settings of the enforcer itself.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct EnforcerConfig {
    /// Seconds between enforcement runs.
    #[serde(default = "default_run_interval")]
    pub run_interval: u64,

    /// Seconds to generate keys for in advance.
    #[serde(default = "default_key_gen_interval")]
    pub key_gen_interval: u64,

    /// Use this time instead of the current time.
    #[serde(default)]
    pub faketime: Option<UnixTime>,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        EnforcerConfig {
            run_interval: DEFAULT_RUN_INTERVAL,
            key_gen_interval: DEFAULT_KEY_GEN_INTERVAL,
            faketime: None,
        }
    }
}

fn default_run_interval() -> u64 {
    DEFAULT_RUN_INTERVAL
}

fn default_key_gen_interval() -> u64 {
    DEFAULT_KEY_GEN_INTERVAL
}

//------------ StateFile -----------------------------------------------------

/// The content of a datastore file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StateFile {
    #[serde(default)]
    pub config: EnforcerConfig,
    #[serde(default)]
    pub tables: Tables,
    #[serde(default)]
    pub hsm: SoftHsm,
}

//------------ Datastore -----------------------------------------------------

/// An open and locked datastore.
pub struct Datastore {
    path: PathBuf,
    pub config: EnforcerConfig,
    pub store: MemoryStore,
    pub hsm: SoftHsm,

    /// Store the locked file to avoid accidental unlocking.
    _locked_file: File,
}

impl Datastore {
    /// Create a new, empty datastore file.
    pub fn create(env: &impl Env, path: &Path) -> Result<(), Error> {
        let abs = env.in_cwd(&path);
        util::create_new_file(&abs)?;
        let json = serde_json::to_string_pretty(&StateFile::default())
            .map_err(|e| format!("unable to serialize state: {e}"))?;
        util::write_to_new_and_rename(&json, &abs)
            .with_context(|| format!("creating datastore {}", path.display()))
    }

    /// Open and lock a datastore.
    pub fn open(env: &impl Env, path: &Path) -> Result<Self, Error> {
        let abs = env.in_cwd(&path).into_owned();
        let mut file = util::file_with_write_lock(&abs)?;
        let mut json = String::new();
        file.read_to_string(&mut json)
            .map_err(|e| format!("unable to read {}: {e}", path.display()))?;
        let state: StateFile = serde_json::from_str(&json)
            .map_err(|e| format!("unable to parse {}: {e}", path.display()))?;
        debug!(
            "opened {} with {} zone(s) and {} key pair(s)",
            path.display(),
            state.tables.zones.len(),
            state.tables.keypairs.len()
        );
        Ok(Datastore {
            path: abs,
            config: state.config,
            store: MemoryStore::new(state.tables),
            hsm: state.hsm,
            _locked_file: file,
        })
    }

    /// Write the datastore back.
    pub fn save(&self) -> Result<(), Error> {
        let state = StateFile {
            config: self.config.clone(),
            tables: self.store.tables().clone(),
            hsm: self.hsm.clone(),
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| format!("unable to serialize state: {e}"))?;
        util::write_to_new_and_rename(&json, &self.path)
    }

    /// The time commands act at.
    ///
    /// This is the fake time if one is configured, the current time
    /// otherwise.
    pub fn now(&self, env: &impl Env) -> UnixTime {
        self.config
            .faketime
            .unwrap_or_else(|| UnixTime::from_secs(env.seconds_since_epoch()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::Storage;
    use crate::env::fake::{FakeCmd, FakeEnv};

    fn env(dir: &Path) -> FakeEnv {
        FakeEnv::new(FakeCmd::new(["kasp"]).cwd(dir).now(500))
    }

    #[test]
    fn create_open_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let env = env(dir.path());
        let path = Path::new("kasp.json");
        Datastore::create(&env, path).unwrap();
        assert!(Datastore::create(&env, path).is_err());

        let mut ds = Datastore::open(&env, path).unwrap();
        assert_eq!(ds.config, EnforcerConfig::default());
        assert_eq!(ds.now(&env), UnixTime::from_secs(500));
        ds.config.faketime = Some(UnixTime::from_secs(42));
        ds.save().unwrap();
        drop(ds);

        let ds = Datastore::open(&env, path).unwrap();
        assert_eq!(ds.now(&env), UnixTime::from_secs(42));
        assert!(ds.store.policies().unwrap().is_empty());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let state: StateFile = serde_json::from_str("{\"config\": {}}").unwrap();
        assert_eq!(state.config, EnforcerConfig::default());
        assert!(state.hsm.is_empty());
    }
}
