//! Network-state data model: per-peer connectivity reports.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// The sentinel string a node reports for a peer that failed to answer.
pub const TIMEOUT_SENTINEL: &str = "timeout";

/// One measured round-trip to a peer: a duration in milliseconds, or the
/// `"timeout"` sentinel when the peer never answered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RttSample {
    /// Round-trip time in milliseconds.
    Millis(f64),
    /// The peer did not answer within the node's probe window.
    Timeout,
}

impl Serialize for RttSample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Millis(ms) => serializer.serialize_f64(*ms),
            Self::Timeout => serializer.serialize_str(TIMEOUT_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for RttSample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SampleVisitor;

        impl Visitor<'_> for SampleVisitor {
            type Value = RttSample;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a number of milliseconds or the string \"timeout\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<RttSample, E> {
                Ok(RttSample::Millis(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RttSample, E> {
                #[allow(clippy::cast_precision_loss)]
                Ok(RttSample::Millis(v as f64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RttSample, E> {
                #[allow(clippy::cast_precision_loss)]
                Ok(RttSample::Millis(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RttSample, E> {
                if v == TIMEOUT_SENTINEL {
                    Ok(RttSample::Timeout)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(SampleVisitor)
    }
}

/// A node's self-reported view of its peer connectivity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerReport {
    /// Observed peers, keyed by peer id.
    #[serde(default)]
    pub peers: BTreeMap<String, RttSample>,
}

/// The hub-wide topology: every identified peer's latest report.
pub type NetworkState = BTreeMap<String, PeerReport>;
