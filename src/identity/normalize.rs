//! Payload normalizer: host message in, [`IdentityRecord`] or nothing out.
//!
//! Hosts answer with several incompatible envelope shapes. Each shape is a
//! matcher in a closed set, tried in [`MATCH_ORDER`]. The order is a
//! compatibility contract: an object that carries both a nested `user` and a
//! top-level `id` resolves through the nested user.
//!
//! Normalization is total. Malformed input is "not recognized", never an
//! error.

use serde_json::{Map, Value};

use super::{identifier_from, IdentityRecord};
use crate::host::RawInbound;

/// Nested payloads deeper than this are not inspected.
const MAX_DEPTH: usize = 4;

/// `type` values that mark a tagged identity envelope.
const USER_INFO_TAGS: [&str; 5] = [
    "userinfo",
    "user_info",
    "USER_INFO",
    "townpass:userinfo",
    "TOWNPASS_USER",
];

/// `source` value that marks a tagged identity envelope.
const HOST_SOURCE: &str = "townpass";

/// Keys a tagged envelope may carry its payload under.
const ENVELOPE_PAYLOAD_KEYS: [&str; 4] = ["payload", "data", "user", "detail"];

/// Keys holding a nested user object.
const NESTED_USER_KEYS: [&str; 2] = ["user", "townpass_user"];

/// Command name of the full user-info reply.
pub const USERINFO_COMMAND: &str = "userinfo";

/// Command name of the identifier-only reply.
pub const USERID_COMMAND: &str = "userid";

/// Envelope shapes the normalizer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// `{type|source: <tag>, payload|data|user|detail: ...}`.
    TaggedEnvelope,
    /// `{user: ...}` or `{townpass_user: ...}`.
    NestedUser,
    /// `{name: "userinfo" | "userid", data: ...}`.
    CommandReply,
    /// An object that already carries an identifier field.
    BareIdentity,
    /// `{detail: ...}` from an event wrapper.
    EventDetail,
}

/// Priority order in which shapes are tried.
pub const MATCH_ORDER: [Shape; 5] = [
    Shape::TaggedEnvelope,
    Shape::NestedUser,
    Shape::CommandReply,
    Shape::BareIdentity,
    Shape::EventDetail,
];

/// Normalize any inbound host message.
pub fn normalize(raw: &RawInbound) -> Option<IdentityRecord> {
    classify(raw).map(|(_, record)| record)
}

/// Normalize an already-decoded JSON value.
pub fn normalize_value(value: &Value) -> Option<IdentityRecord> {
    classify_value(value, 0).map(|(_, record)| record)
}

/// Normalize and report which outer shape matched.
///
/// Strings are JSON-decoded exactly once before matching. Event wrappers are
/// tried on their `data` first, then their `detail`.
pub fn classify(raw: &RawInbound) -> Option<(Shape, IdentityRecord)> {
    match raw {
        RawInbound::Text(text) => classify_text(text, 0),
        RawInbound::Value(value) => classify_value(value, 0),
        RawInbound::Event(event) => event
            .data
            .as_ref()
            .and_then(|data| classify_value(data, 0))
            .or_else(|| {
                event
                    .detail
                    .as_ref()
                    .and_then(|detail| classify_value(detail, 1))
                    .map(|(_, record)| (Shape::EventDetail, record))
            }),
    }
}

fn classify_text(text: &str, depth: usize) -> Option<(Shape, IdentityRecord)> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => classify_object(&object, depth),
        _ => None,
    }
}

fn classify_value(value: &Value, depth: usize) -> Option<(Shape, IdentityRecord)> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(object) => classify_object(object, depth),
        Value::String(text) => classify_text(text, depth),
        _ => None,
    }
}

fn classify_object(object: &Map<String, Value>, depth: usize) -> Option<(Shape, IdentityRecord)> {
    MATCH_ORDER
        .iter()
        .find_map(|shape| match_shape(*shape, object, depth).map(|record| (*shape, record)))
}

fn match_shape(shape: Shape, object: &Map<String, Value>, depth: usize) -> Option<IdentityRecord> {
    let next = depth.saturating_add(1);
    match shape {
        Shape::TaggedEnvelope => {
            if !is_tagged(object) {
                return None;
            }
            ENVELOPE_PAYLOAD_KEYS
                .iter()
                .filter_map(|key| object.get(*key))
                .find_map(|payload| nested(payload, next))
        }
        Shape::NestedUser => NESTED_USER_KEYS
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(|user| nested(user, next)),
        Shape::CommandReply => {
            let data = object.get("data")?;
            match object.get("name").and_then(Value::as_str)? {
                USERINFO_COMMAND => nested(data, next),
                USERID_COMMAND => identifier_from(data).and_then(IdentityRecord::from_id),
                _ => None,
            }
        }
        Shape::BareIdentity => IdentityRecord::from_object(object),
        Shape::EventDetail => object.get("detail").and_then(|detail| nested(detail, next)),
    }
}

fn nested(value: &Value, depth: usize) -> Option<IdentityRecord> {
    classify_value(value, depth).map(|(_, record)| record)
}

fn is_tagged(object: &Map<String, Value>) -> bool {
    let typed = object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|tag| USER_INFO_TAGS.contains(&tag));
    let sourced = object
        .get("source")
        .and_then(Value::as_str)
        .is_some_and(|source| source == HOST_SOURCE);
    typed || sourced
}
