//! The key lifecycle engine.
//!
//! Every key of a zone moves along a ladder of states, from Generate
//! through Publish, Ready and Active to Retire and Dead. KSKs additionally
//! pass through the DS coordination states with the parent. A pass of the
//! engine, [`request_keys`], looks at all keys of a policy's zones and
//! moves them along wherever their time has come or demand requires.
//!
//! The engine works on a [`Storage`] and, for creating and destroying key
//! material, a [`KeyMaterial`] service. Both are traits so that the
//! engine does not care where things are kept.

pub mod count;
pub mod error;
pub mod estimate;
pub mod generate;
pub mod hsm;
pub mod key;
pub mod operator;
pub mod policy;
pub mod purge;
pub mod query;
pub mod request;
pub mod store;
pub mod time;
pub mod transition;

pub use self::error::{EnforcerError, Warning};
pub use self::generate::generate_keys;
pub use self::hsm::{KeyLookup, KeyMaterial, SoftHsm};
pub use self::key::{Key, KeyPair, KeyState, KeyType, Repository, Zone};
pub use self::policy::{Parameters, Policy, PolicySpec};
pub use self::purge::{purge_dead_keys, purge_expired, PurgeScope, Purged};
pub use self::query::{Filter, ZoneScope};
pub use self::request::{request_keys, KeyTypeFilter, Request, RequestOutcome};
pub use self::store::{MemoryStore, Storage, Tables, Transaction};
pub use self::time::UnixTime;
