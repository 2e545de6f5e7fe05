//! Identifiers carried on the bus.
//!
//! `EnvelopeId` は ULID ベース。Phantom type で他の ID と混同できないようにしている。
//! `HandlerId` はバス上のアドレス（人間が読める名前）なので String の newtype。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"env-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Envelope のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Env {}

impl IdMarker for Env {
    fn prefix() -> &'static str {
        "env-"
    }
}

/// Identifier of one envelope. Also used as the correlation key.
pub type EnvelopeId = Id<Env>;

/// Bus address of a handler (or of a transient caller).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(String);

impl HandlerId {
    pub const INTENT_PARSER: &'static str = "intent-parser";
    pub const WORKFLOW_MAPPER: &'static str = "workflow-mapper";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn intent_parser() -> Self {
        Self::new(Self::INTENT_PARSER)
    }

    pub fn workflow_mapper() -> Self {
        Self::new(Self::WORKFLOW_MAPPER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_id_display_has_prefix() {
        let id = EnvelopeId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("env-"));
    }

    #[test]
    fn envelope_id_serializes_as_plain_ulid() {
        let ulid = Ulid::new();
        let id = EnvelopeId::from_ulid(ulid);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));

        let back: EnvelopeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        assert_eq!(std::mem::size_of::<EnvelopeId>(), std::mem::size_of::<Ulid>());
    }

    #[test]
    fn well_known_handler_ids() {
        assert_eq!(HandlerId::intent_parser().as_str(), "intent-parser");
        assert_eq!(HandlerId::from("workflow-mapper"), HandlerId::workflow_mapper());
    }
}
