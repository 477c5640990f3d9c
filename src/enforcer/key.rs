//! Keys, zones and repositories.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::query::{Column, Row};
use super::time::UnixTime;

//------------ KeyType -------------------------------------------------------

/// The role a key plays in a zone.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Key signing key.
    Ksk,

    /// Zone signing key.
    Zsk,

    /// Combined signing key.
    Csk,
}

impl KeyType {
    /// The value stored in the key type column.
    pub fn code(self) -> i64 {
        match self {
            KeyType::Ksk => 257,
            KeyType::Zsk => 256,
            KeyType::Csk => 258,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            257 => Some(KeyType::Ksk),
            256 => Some(KeyType::Zsk),
            258 => Some(KeyType::Csk),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyType::Ksk => "KSK",
            KeyType::Zsk => "ZSK",
            KeyType::Csk => "CSK",
        })
    }
}

//------------ KeyState ------------------------------------------------------

/// The lifecycle state of a key in a zone.
///
/// The numeric values are the ones found in the state column. They do not
/// reflect the order of the ladder, use [`KeyState::rank`] for that.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    Generate = 1,
    Publish = 2,
    Ready = 3,
    Active = 4,
    Retire = 5,
    Dead = 6,
    #[value(name = "dssub")]
    DsSub = 7,
    #[value(name = "dspublish")]
    DsPublish = 8,
    #[value(name = "dsready")]
    DsReady = 9,
    #[value(name = "keypublish")]
    KeyPublish = 10,
}

impl KeyState {
    pub const ALL: [KeyState; 10] = [
        KeyState::Generate,
        KeyState::Publish,
        KeyState::Ready,
        KeyState::Active,
        KeyState::Retire,
        KeyState::Dead,
        KeyState::DsSub,
        KeyState::DsPublish,
        KeyState::DsReady,
        KeyState::KeyPublish,
    ];

    /// States whose keys are published in the zone.
    pub const ISSUED: [KeyState; 5] = [
        KeyState::Publish,
        KeyState::Ready,
        KeyState::Active,
        KeyState::Retire,
        KeyState::KeyPublish,
    ];

    /// States that count towards the number of usable keys.
    pub const AVAILABLE: [KeyState; 4] = [
        KeyState::Publish,
        KeyState::Ready,
        KeyState::Active,
        KeyState::KeyPublish,
    ];

    /// States of a KSK whose DS is on its way to the parent.
    pub const STANDBY: [KeyState; 3] = [KeyState::DsSub, KeyState::DsPublish, KeyState::DsReady];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.code() == code)
    }

    /// Position of the state on the lifecycle ladder.
    ///
    /// A key only ever moves to states of equal or higher rank. The KSK
    /// parent coordination states sit between Generate and Active, in
    /// parallel to Publish and Ready.
    pub fn rank(self) -> u8 {
        match self {
            KeyState::Generate => 0,
            KeyState::Publish | KeyState::DsSub => 1,
            KeyState::DsPublish => 2,
            KeyState::DsReady => 3,
            KeyState::Ready | KeyState::KeyPublish => 4,
            KeyState::Active => 5,
            KeyState::Retire => 6,
            KeyState::Dead => 7,
        }
    }

    /// Whether this state only exists for KSKs.
    pub fn is_ksk_only(self) -> bool {
        matches!(
            self,
            KeyState::DsSub | KeyState::DsPublish | KeyState::DsReady | KeyState::KeyPublish
        )
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyState::Generate => "generate",
            KeyState::Publish => "publish",
            KeyState::Ready => "ready",
            KeyState::Active => "active",
            KeyState::Retire => "retire",
            KeyState::Dead => "dead",
            KeyState::DsSub => "dssub",
            KeyState::DsPublish => "dspublish",
            KeyState::DsReady => "dsready",
            KeyState::KeyPublish => "keypublish",
        })
    }
}

//------------ KeyDates ------------------------------------------------------

/// One timestamp per state.
///
/// For the current state the timestamp is the actual time of entering it,
/// for the next state it is the estimate of when the key gets there.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct KeyDates {
    pub generate: Option<UnixTime>,
    pub publish: Option<UnixTime>,
    pub ready: Option<UnixTime>,
    pub active: Option<UnixTime>,
    pub retire: Option<UnixTime>,
    pub dead: Option<UnixTime>,
    pub dssub: Option<UnixTime>,
    pub dspublish: Option<UnixTime>,
    pub dsready: Option<UnixTime>,
    pub keypublish: Option<UnixTime>,
}

impl KeyDates {
    pub fn get(&self, state: KeyState) -> Option<UnixTime> {
        match state {
            KeyState::Generate => self.generate,
            KeyState::Publish => self.publish,
            KeyState::Ready => self.ready,
            KeyState::Active => self.active,
            KeyState::Retire => self.retire,
            KeyState::Dead => self.dead,
            KeyState::DsSub => self.dssub,
            KeyState::DsPublish => self.dspublish,
            KeyState::DsReady => self.dsready,
            KeyState::KeyPublish => self.keypublish,
        }
    }

    pub fn set(&mut self, state: KeyState, time: Option<UnixTime>) {
        let slot = match state {
            KeyState::Generate => &mut self.generate,
            KeyState::Publish => &mut self.publish,
            KeyState::Ready => &mut self.ready,
            KeyState::Active => &mut self.active,
            KeyState::Retire => &mut self.retire,
            KeyState::Dead => &mut self.dead,
            KeyState::DsSub => &mut self.dssub,
            KeyState::DsPublish => &mut self.dspublish,
            KeyState::DsReady => &mut self.dsready,
            KeyState::KeyPublish => &mut self.keypublish,
        };
        *slot = time;
    }
}

//------------ KeyPair -------------------------------------------------------

/// Key material known to the enforcer.
///
/// The key itself lives in a repository, the enforcer only knows its
/// locator.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct KeyPair {
    pub id: u64,
    pub locator: String,
    pub keytype: KeyType,
    pub algorithm: u8,
    pub bits: u16,
    pub repository_id: u64,
    pub policy_id: u64,

    /// When the key was generated.
    pub generate: UnixTime,

    /// When the repository last confirmed a backup containing this key.
    #[serde(default)]
    pub backup: Option<UnixTime>,
}

//------------ ZoneKey -------------------------------------------------------

/// The instance of a key pair in one zone.
///
/// With key sharing, one key pair may be used by several zones of a
/// policy. Each of them tracks its own state and dates.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ZoneKey {
    pub keypair_id: u64,
    pub zone_id: u64,

    /// The raw state code.
    ///
    /// Kept raw so that a row with an unknown code survives a load and
    /// can be reported instead of failing the whole store.
    pub state: i64,

    #[serde(default)]
    pub dates: KeyDates,

    /// The next estimate was set by an operator and must not be touched.
    #[serde(default)]
    pub fixed_date: bool,

    #[serde(default)]
    pub revoked: bool,
}

//------------ Key -----------------------------------------------------------

/// A key as seen by the engine: a key pair joined with its zone instance.
///
/// Key pairs that have not been allocated to a zone yet appear with no
/// zone and in the Generate state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Key {
    pub keypair_id: u64,
    pub zone_id: Option<u64>,
    pub policy_id: u64,
    pub keytype: KeyType,
    pub algorithm: u8,
    pub bits: u16,
    pub locator: String,
    pub repository_id: u64,
    pub backup: Option<UnixTime>,
    pub state_code: i64,
    pub dates: KeyDates,
    pub fixed_date: bool,
    pub revoked: bool,
}

impl Key {
    /// Join a key pair with its zone instance.
    pub fn new(pair: &KeyPair, instance: Option<&ZoneKey>) -> Self {
        let (zone_id, state_code, dates, fixed_date, revoked) = match instance {
            Some(zk) => (
                Some(zk.zone_id),
                zk.state,
                zk.dates.clone(),
                zk.fixed_date,
                zk.revoked,
            ),
            None => {
                let dates = KeyDates {
                    generate: Some(pair.generate),
                    ..Default::default()
                };
                (None, KeyState::Generate.code(), dates, false, false)
            }
        };
        Key {
            keypair_id: pair.id,
            zone_id,
            policy_id: pair.policy_id,
            keytype: pair.keytype,
            algorithm: pair.algorithm,
            bits: pair.bits,
            locator: pair.locator.clone(),
            repository_id: pair.repository_id,
            backup: pair.backup,
            state_code,
            dates,
            fixed_date,
            revoked,
        }
    }

    /// The state of the key, if the stored code is a known one.
    pub fn state(&self) -> Option<KeyState> {
        KeyState::from_code(self.state_code)
    }
}

impl Row for Key {
    fn field(&self, column: Column) -> Option<i64> {
        match column {
            Column::KeyId => i64::try_from(self.keypair_id).ok(),
            Column::ZoneId => self.zone_id.and_then(|id| i64::try_from(id).ok()),
            Column::PolicyId => i64::try_from(self.policy_id).ok(),
            Column::KeyType => Some(self.keytype.code()),
            Column::State => Some(self.state_code),
            Column::Algorithm => Some(self.algorithm.into()),
            Column::Repository => i64::try_from(self.repository_id).ok(),
            Column::Backup => self.backup.map(UnixTime::as_field),
            Column::FixedDate => Some(self.fixed_date.into()),
            Column::Revoked => Some(self.revoked.into()),
            Column::Date(state) => self.dates.get(state).map(UnixTime::as_field),
        }
    }
}

//------------ Zone ----------------------------------------------------------

/// A zone under enforcement.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Zone {
    pub id: u64,

    /// The zone's domain name, without the trailing dot.
    pub name: String,

    pub policy_id: u64,

    /// Where the signer configuration for the zone is written.
    #[serde(default)]
    pub signconf: Option<String>,

    /// An operator asked for a KSK rollover at the next opportunity.
    #[serde(default)]
    pub roll_ksk_now: bool,

    /// An operator asked for a ZSK rollover at the next opportunity.
    #[serde(default)]
    pub roll_zsk_now: bool,
}

impl Zone {
    pub fn roll_now(&self, keytype: KeyType) -> bool {
        match keytype {
            KeyType::Ksk => self.roll_ksk_now,
            KeyType::Zsk => self.roll_zsk_now,
            KeyType::Csk => self.roll_ksk_now || self.roll_zsk_now,
        }
    }

    pub fn set_roll_now(&mut self, keytype: KeyType, value: bool) {
        match keytype {
            KeyType::Ksk => self.roll_ksk_now = value,
            KeyType::Zsk => self.roll_zsk_now = value,
            KeyType::Csk => {
                self.roll_ksk_now = value;
                self.roll_zsk_now = value;
            }
        }
    }
}

//------------ Repository ----------------------------------------------------

/// A place where key material is kept.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,

    /// Keys may only become active once a backup has been confirmed.
    #[serde(default)]
    pub require_backup: bool,

    /// Maximum number of keys the repository can hold.
    #[serde(default)]
    pub capacity: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in KeyState::ALL {
            assert_eq!(KeyState::from_code(state.code()), Some(state));
        }
        assert_eq!(KeyState::from_code(0), None);
        assert_eq!(KeyState::from_code(11), None);
    }

    #[test]
    fn ladder_order() {
        use KeyState::*;

        let zsk = [Generate, Publish, Ready, Active, Retire, Dead];
        let ksk = [Generate, DsSub, DsPublish, DsReady, KeyPublish, Active, Retire, Dead];
        for ladder in [&zsk[..], &ksk[..]] {
            assert!(ladder.windows(2).all(|w| w[0].rank() < w[1].rank()));
        }
    }

    #[test]
    fn pool_key_is_in_generate() {
        let pair = KeyPair {
            id: 3,
            locator: "abc".into(),
            keytype: KeyType::Zsk,
            algorithm: 8,
            bits: 2048,
            repository_id: 1,
            policy_id: 1,
            generate: UnixTime::from_secs(10),
            backup: None,
        };
        let key = Key::new(&pair, None);
        assert_eq!(key.state(), Some(KeyState::Generate));
        assert_eq!(key.zone_id, None);
        assert_eq!(key.field(Column::ZoneId), None);
        assert_eq!(key.field(Column::Date(KeyState::Generate)), Some(10));
    }
}
