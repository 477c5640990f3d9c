use std::path::PathBuf;

use super::commands::Command;
use super::env::Env;
use super::error::Error;
use super::log::{self, Verbosity};

#[derive(Clone, Debug, clap::Parser)]
#[command(version, disable_help_subcommand = true)]
pub struct Args {
    /// The datastore to work on
    #[arg(
        long = "datastore",
        short = 'c',
        value_name = "FILE",
        default_value = "kasp.json",
        global = true
    )]
    datastore: PathBuf,

    /// Log more, can be given multiple times
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn execute(self, env: impl Env) -> Result<(), Error> {
        let _guard = log::init(
            &env,
            Verbosity {
                verbose: self.verbose,
                quiet: self.quiet,
            },
        );
        self.command.execute(env, &self.datastore)
    }
}

impl From<Command> for Args {
    fn from(value: Command) -> Self {
        Args {
            datastore: "kasp.json".into(),
            verbose: 0,
            quiet: false,
            command: value,
        }
    }
}
