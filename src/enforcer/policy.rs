//! Policies and their parameter collection.

use std::str::FromStr;

use domain::base::iana::SecurityAlgorithm;
use jiff::{Span, SpanRelativeTo};
use serde::{Deserialize, Deserializer, Serialize};

use super::error::EnforcerError;
use super::key::KeyType;
use super::store::Storage;

//------------ KskRollover ---------------------------------------------------

/// How a KSK rollover is coordinated with the parent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KskRollover {
    /// Publish the new DNSKEY first, swap the DS afterwards.
    DoubleSignature,

    /// Publish the new DS first, swap the DNSKEY afterwards.
    #[default]
    DoubleDs,

    /// Publish DNSKEY and DS together. Timed like a double signature roll.
    DoubleRrset,
}

//------------ KeyParameters -------------------------------------------------

/// Parameters for the keys of one type.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct KeyParameters {
    /// DNSSEC algorithm number.
    pub algorithm: u8,
    pub bits: u16,

    /// Seconds a key stays active. Zero means forever.
    pub lifetime: u64,

    /// Name of the repository keys are generated in.
    pub repository: String,

    /// Number of standby keys to keep around.
    #[serde(default)]
    pub standby: u64,

    /// Rollovers only happen on operator request.
    #[serde(default)]
    pub manual_rollover: bool,
}

//------------ Parameters ----------------------------------------------------

/// The timing and sizing constants of a policy.
///
/// All durations are in seconds.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Parameters {
    /// TTL of the DNSKEY RRset.
    pub dnskey_ttl: u64,

    /// TTL of the DS RRset at the parent.
    pub ksk_ttl: u64,

    pub soa_ttl: u64,
    pub soa_min: u64,

    /// Time for a zone change to reach all secondaries.
    pub propagation_delay: u64,

    /// Time for a parent change to reach all of the parent's servers.
    pub ksk_propagation_delay: u64,

    pub publish_safety: u64,
    pub retire_safety: u64,

    /// Validity period of signatures made by a ZSK.
    pub zsk_signature_lifetime: u64,

    pub ksk_rollover: KskRollover,

    /// Keys may be shared between the zones of this policy.
    #[serde(default)]
    pub share_keys: bool,

    /// Dead keys are purged automatically this long after dying.
    #[serde(default)]
    pub purge_after: Option<u64>,

    pub ksk: KeyParameters,
    pub zsk: KeyParameters,
}

impl Parameters {
    /// Load the parameters of a policy.
    pub fn load<S: Storage + ?Sized>(store: &S, policy_id: u64) -> Result<Self, EnforcerError> {
        let policy = store
            .policy(policy_id)?
            .ok_or(EnforcerError::PolicyNotFound(policy_id))?;
        policy
            .params
            .validate()
            .map_err(|reason| EnforcerError::ParameterLoadFailed { policy_id, reason })?;
        Ok(policy.params)
    }

    /// Check that the parameters make sense.
    pub fn validate(&self) -> Result<(), String> {
        for (keytype, params) in [(KeyType::Ksk, &self.ksk), (KeyType::Zsk, &self.zsk)] {
            let alg = SecurityAlgorithm::from_int(params.algorithm);
            if alg.to_mnemonic().is_none() {
                return Err(format!(
                    "unknown {keytype} algorithm {}",
                    params.algorithm
                ));
            }
            if params.repository.is_empty() {
                return Err(format!("no repository for {keytype}s"));
            }
        }
        Ok(())
    }

    pub fn keys(&self, keytype: KeyType) -> &KeyParameters {
        match keytype {
            KeyType::Zsk => &self.zsk,
            KeyType::Ksk | KeyType::Csk => &self.ksk,
        }
    }

    /// Whether KSK rollovers publish the new DS before the new DNSKEY.
    pub fn ds_driven(&self) -> bool {
        self.ksk_rollover == KskRollover::DoubleDs
    }

    /// Time for a newly published DNSKEY to be known to all resolvers.
    pub fn ipc(&self) -> u64 {
        self.dnskey_ttl
            .saturating_add(self.propagation_delay)
            .saturating_add(self.publish_safety)
    }

    /// Time for a newly published DS to be known to all resolvers.
    pub fn ds_interval(&self) -> u64 {
        self.ksk_ttl
            .saturating_add(self.ksk_propagation_delay)
            .saturating_add(self.publish_safety)
    }

    /// Time between publishing a key and it being ready to use.
    pub fn publication_interval(&self, keytype: KeyType) -> u64 {
        match keytype {
            KeyType::Ksk if self.ds_driven() => self.ds_interval(),
            _ => self.ipc(),
        }
    }
}

//------------ Policy --------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Policy {
    pub id: u64,
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub params: Parameters,
}

//------------ PolicySpec ----------------------------------------------------

/// A policy as written by an operator.
///
/// Durations are written as spans such as `"1h"`, `"30 days"` or
/// `"P1D"`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(deserialize_with = "span_secs")]
    pub dnskey_ttl: u64,
    #[serde(deserialize_with = "span_secs")]
    pub ksk_ttl: u64,
    #[serde(deserialize_with = "span_secs")]
    pub soa_ttl: u64,
    #[serde(deserialize_with = "span_secs")]
    pub soa_min: u64,
    #[serde(deserialize_with = "span_secs")]
    pub propagation_delay: u64,
    #[serde(deserialize_with = "span_secs")]
    pub ksk_propagation_delay: u64,
    #[serde(deserialize_with = "span_secs")]
    pub publish_safety: u64,
    #[serde(deserialize_with = "span_secs")]
    pub retire_safety: u64,
    #[serde(deserialize_with = "span_secs")]
    pub zsk_signature_lifetime: u64,

    #[serde(default)]
    pub ksk_rollover: KskRollover,

    #[serde(default)]
    pub share_keys: bool,

    #[serde(default, deserialize_with = "opt_span_secs")]
    pub purge_after: Option<u64>,

    pub ksk: KeySpec,
    pub zsk: KeySpec,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeySpec {
    pub algorithm: u8,
    pub bits: u16,
    #[serde(deserialize_with = "span_secs")]
    pub lifetime: u64,
    pub repository: String,
    #[serde(default)]
    pub standby: u64,
    #[serde(default)]
    pub manual_rollover: bool,
}

impl PolicySpec {
    /// Turn the specification into a policy with the given id.
    pub fn into_policy(self, id: u64) -> Result<Policy, String> {
        let params = Parameters {
            dnskey_ttl: self.dnskey_ttl,
            ksk_ttl: self.ksk_ttl,
            soa_ttl: self.soa_ttl,
            soa_min: self.soa_min,
            propagation_delay: self.propagation_delay,
            ksk_propagation_delay: self.ksk_propagation_delay,
            publish_safety: self.publish_safety,
            retire_safety: self.retire_safety,
            zsk_signature_lifetime: self.zsk_signature_lifetime,
            ksk_rollover: self.ksk_rollover,
            share_keys: self.share_keys,
            purge_after: self.purge_after,
            ksk: self.ksk.into(),
            zsk: self.zsk.into(),
        };
        params.validate()?;
        Ok(Policy {
            id,
            name: self.name,
            description: self.description,
            params,
        })
    }
}

impl From<KeySpec> for KeyParameters {
    fn from(spec: KeySpec) -> Self {
        KeyParameters {
            algorithm: spec.algorithm,
            bits: spec.bits,
            lifetime: spec.lifetime,
            repository: spec.repository,
            standby: spec.standby,
            manual_rollover: spec.manual_rollover,
        }
    }
}

/// Parse a span into whole seconds.
pub fn parse_span_secs(value: &str) -> Result<u64, String> {
    let span = Span::from_str(value)
        .map_err(|e| format!("unable to parse {value} as duration: {e}"))?;
    let dur = span
        .to_duration(SpanRelativeTo::days_are_24_hours())
        .map_err(|e| format!("unable to convert duration {value}: {e}"))?;
    u64::try_from(dur.as_secs()).map_err(|_| format!("negative duration {value}"))
}

/// Accept either a span string or a plain number of seconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum SpanOrSecs {
    Secs(u64),
    Span(String),
}

fn span_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match SpanOrSecs::deserialize(deserializer)? {
        SpanOrSecs::Secs(secs) => Ok(secs),
        SpanOrSecs::Span(s) => parse_span_secs(&s).map_err(serde::de::Error::custom),
    }
}

fn opt_span_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    span_secs(deserializer).map(Some)
}
