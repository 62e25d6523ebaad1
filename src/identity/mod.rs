//! Canonical identity record produced from host payloads.
//!
//! An [`IdentityRecord`] is only ever built by [`normalize`] (or
//! [`IdentityRecord::from_id`] for the bare user-id reply). Fields are
//! exposed through accessors so a record cannot change after construction.
//!
//! The typed fields are a read-only view. A record serializes as the object
//! the host delivered, key for key, so whatever the host signed reaches the
//! backend unchanged.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub mod normalize;

pub use normalize::{classify, normalize, normalize_value, Shape, MATCH_ORDER};

/// Keys that may carry the user identifier, in lookup order.
pub(crate) const ID_KEYS: [&str; 4] = ["id", "userId", "user_id", "uid"];

const NAME_KEYS: [&str; 4] = ["name", "displayName", "display_name", "nickname"];
const EMAIL_KEYS: [&str; 2] = ["email", "mail"];
const PHONE_KEYS: [&str; 4] = ["phone", "phoneNumber", "phone_number", "mobile"];
const TOKEN_KEYS: [&str; 3] = ["token", "accessToken", "access_token"];
const SIGNATURE_KEYS: [&str; 2] = ["signature", "sig"];
const TIMESTAMP_KEYS: [&str; 4] = ["timestamp", "issuedAt", "issued_at", "iat"];

/// Epoch values at or above this are read as milliseconds, below as seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// The caller identity supplied by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    id: String,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    token: Option<String>,
    signature: Option<String>,
    issued_at: Option<DateTime<Utc>>,
    extra: Map<String, Value>,
    source: Map<String, Value>,
}

impl Serialize for IdentityRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.source.serialize(serializer)
    }
}

impl IdentityRecord {
    /// Record carrying only an identifier (the `userid` command reply).
    ///
    /// Returns `None` for an empty identifier.
    pub fn from_id(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            return None;
        }
        let mut source = Map::new();
        source.insert("id".to_owned(), Value::String(id.clone()));
        Some(Self {
            id,
            name: None,
            email: None,
            phone: None,
            token: None,
            signature: None,
            issued_at: None,
            extra: Map::new(),
            source,
        })
    }

    /// Build a record from an object that carries an identifier field.
    ///
    /// The first usable alias of each known field is read into a typed
    /// field; every other key lands in [`extra`](Self::extra) untouched. The
    /// object itself is kept as [`source`](Self::source).
    pub(crate) fn from_object(object: &Map<String, Value>) -> Option<Self> {
        let mut rest = object.clone();
        let id = take_identifier(&mut rest)?;

        let issued_at = take_timestamp(&mut rest);

        Some(Self {
            id,
            name: take_text(&mut rest, &NAME_KEYS),
            email: take_text(&mut rest, &EMAIL_KEYS),
            phone: take_text(&mut rest, &PHONE_KEYS),
            token: take_text(&mut rest, &TOKEN_KEYS),
            signature: take_text(&mut rest, &SIGNATURE_KEYS),
            issued_at,
            extra: rest,
            source: object.clone(),
        })
    }

    /// The host's user identifier, exactly as delivered.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Email address.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Phone number.
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    /// Opaque credential token issued by the host.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Opaque signature over the identity, verified by the backend.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// When the host issued this identity.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Unvalidated fields the host included beyond the ones read above.
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// The object exactly as the host delivered it. This is what the record
    /// serializes to.
    pub fn source(&self) -> &Map<String, Value> {
        &self.source
    }
}

/// Identifier from a JSON value: non-empty string verbatim, or an integer.
pub(crate) fn identifier_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn take_identifier(rest: &mut Map<String, Value>) -> Option<String> {
    let key = ID_KEYS
        .iter()
        .find(|key| rest.get(**key).and_then(identifier_from).is_some())?;
    rest.remove(*key).as_ref().and_then(identifier_from)
}

fn take_text(rest: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    let key = keys.iter().find(|key| {
        matches!(rest.get(**key), Some(Value::String(_)))
            || matches!(rest.get(**key), Some(Value::Number(_)))
    })?;
    match rest.remove(*key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn take_timestamp(rest: &mut Map<String, Value>) -> Option<DateTime<Utc>> {
    let key = TIMESTAMP_KEYS
        .iter()
        .find(|key| rest.get(**key).and_then(parse_timestamp).is_some())?;
    rest.remove(*key).as_ref().and_then(parse_timestamp)
}

/// Epoch seconds, epoch milliseconds, or RFC 3339.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(epoch) => from_epoch(epoch),
            Err(_) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        },
        _ => None,
    }
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}
