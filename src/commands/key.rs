use crate::datastore::Datastore;
use crate::enforcer::operator::{ds_seen, ds_submitted, find_zone, fix_date};
use crate::enforcer::query::{Column, Compare, Predicate};
use crate::enforcer::{Filter, KeyState, Storage, UnixTime, ZoneScope};
use crate::env::Env;
use crate::error::Error;
use crate::parse::{parse_time, parse_zone_name};

use super::print_keys;

#[derive(Clone, Debug, PartialEq, Eq, clap::Subcommand)]
pub enum KeyCommands {
    /// List keys
    ///
    /// Keys that have not been allocated to a zone yet are listed as part
    /// of the pool.
    List {
        /// Only list the keys of this zone
        #[arg(long, short = 'z', value_parser = parse_zone_name)]
        zone: Option<String>,

        /// Include dead keys
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Report that the DS of a KSK has been submitted to the parent
    DsSubmit {
        /// The zone name
        #[arg(value_parser = parse_zone_name)]
        zone: String,

        /// The id of the key
        keyid: u64,
    },

    /// Report that the DS of a KSK is visible at the parent
    DsSeen {
        /// The zone name
        #[arg(value_parser = parse_zone_name)]
        zone: String,

        /// The id of the key
        keyid: u64,
    },

    /// Set the time a key reaches a state
    ///
    /// The time is left alone by the enforcer until the key changes state.
    FixDate {
        /// The zone name
        #[arg(value_parser = parse_zone_name)]
        zone: String,

        /// The id of the key
        keyid: u64,

        /// The state
        #[arg(value_enum)]
        state: KeyState,

        /// The time, in seconds since the epoch or as RFC 3339 timestamp
        #[arg(value_parser = parse_time)]
        time: UnixTime,
    },
}

impl KeyCommands {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        match self {
            Self::List { zone, all } => {
                let mut filter = Filter::new();
                if let Some(name) = zone {
                    let zone = find_zone(&ds.store, &name)?;
                    filter = filter.zone(ZoneScope::Zone(zone.id));
                }
                if !all {
                    filter = filter.and(Predicate::Compare(
                        Column::State,
                        Compare::Ne,
                        KeyState::Dead.code(),
                    ));
                }
                let keys = ds.store.keys(&filter)?;
                print_keys(env, &ds.store, &keys)?;
                Ok(false)
            }
            Self::DsSubmit { zone, keyid } => {
                let now = ds.now(env);
                ds_submitted(&mut ds.store, &zone, keyid, now)?;
                writeln!(env.stdout(), "DS of key {keyid} of {zone} submitted");
                Ok(true)
            }
            Self::DsSeen { zone, keyid } => {
                let now = ds.now(env);
                let warnings = ds_seen(&mut ds.store, &zone, keyid, now)?;
                writeln!(env.stdout(), "key {keyid} of {zone} is now active");
                if !warnings.is_empty() {
                    Error::warn(&format!("{} warning(s)", warnings.len())).pretty_print(env);
                }
                Ok(true)
            }
            Self::FixDate {
                zone,
                keyid,
                state,
                time,
            } => {
                fix_date(&mut ds.store, &zone, keyid, state, time)?;
                writeln!(env.stdout(), "{state} time of key {keyid} of {zone} set to {time}");
                Ok(true)
            }
        }
    }
}
