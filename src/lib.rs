//! A DNSSEC key and signing policy enforcer.
//!
//! _kasp_ keeps track of the keys of DNS zones and moves them through their
//! lifecycle according to a policy: it generates keys ahead of time, tells
//! when keys are to be published, used and retired, and coordinates KSK
//! rollovers with the parent zone. The [`enforcer`] module contains the
//! engine, the rest of the crate is the command line tool around it.

pub mod args;
pub mod commands;
pub mod datastore;
pub mod enforcer;
pub mod env;
pub mod error;
pub mod log;
pub mod parse;
pub mod util;

use clap::Parser;

pub use self::args::Args;
use self::env::Env;
use self::error::Error;

/// Parse the command line of the environment.
pub fn parse_args(env: impl Env) -> Result<Args, Error> {
    Args::try_parse_from(env.args_os()).map_err(Error::from)
}

/// Run the program in an environment and return its exit code.
pub fn run(env: impl Env) -> u8 {
    let res = parse_args(&env).and_then(|args| args.execute(&env));
    match res {
        Ok(()) => 0,
        Err(err) => {
            err.pretty_print(&env);
            err.exit_code()
        }
    }
}
