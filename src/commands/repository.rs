use crate::datastore::Datastore;
use crate::enforcer::operator::backup_done;
use crate::enforcer::{KeyMaterial, Repository};
use crate::env::Env;
use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Eq, clap::Subcommand)]
pub enum RepositoryCommands {
    /// Add a repository
    Add {
        /// Name of the repository
        name: String,

        /// Keys may only become active after a backup
        #[arg(long)]
        require_backup: bool,

        /// Maximum number of keys the repository holds
        #[arg(long)]
        capacity: Option<u64>,
    },

    /// List all repositories
    List,
}

impl RepositoryCommands {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        match self {
            Self::Add {
                name,
                require_backup,
                capacity,
            } => {
                ds.store.add_repository(Repository {
                    id: 0,
                    name: name.clone(),
                    require_backup,
                    capacity,
                })?;
                writeln!(env.stdout(), "repository {name} added");
                Ok(true)
            }
            Self::List => {
                let mut out = env.stdout();
                for repo in ds.store.repositories() {
                    let keys = ds.hsm.repository_key_count(repo)?;
                    let capacity = repo
                        .capacity
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".into());
                    writeln!(
                        out,
                        "{:<16} {keys:>6} / {capacity:<6} {}",
                        repo.name,
                        if repo.require_backup {
                            "backup required"
                        } else {
                            ""
                        }
                    );
                }
                Ok(false)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, clap::Subcommand)]
pub enum BackupCommands {
    /// Mark all keys of a repository as backed up
    Done {
        /// Name of the repository
        repository: String,
    },
}

impl BackupCommands {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        match self {
            Self::Done { repository } => {
                let now = ds.now(env);
                let n = backup_done(&mut ds.store, &repository, now)?;
                writeln!(env.stdout(), "{n} key(s) in {repository} marked as backed up");
                Ok(n > 0)
            }
        }
    }
}
