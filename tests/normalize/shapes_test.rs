//! Envelope shape recognition tests.

use serde_json::json;
use townpass_bridge::host::{HostEvent, RawInbound};
use townpass_bridge::identity::{classify, normalize, normalize_value, Shape, MATCH_ORDER};

fn id_of(raw: RawInbound) -> Option<String> {
    normalize(&raw).map(|record| record.id().to_owned())
}

#[test]
fn match_order_is_fixed() {
    assert_eq!(
        MATCH_ORDER,
        [
            Shape::TaggedEnvelope,
            Shape::NestedUser,
            Shape::CommandReply,
            Shape::BareIdentity,
            Shape::EventDetail,
        ]
    );
}

#[test]
fn userinfo_reply_with_encoded_data() {
    let raw = RawInbound::Value(json!({
        "name": "userinfo",
        "data": "{\"id\":\"u1\",\"name\":\"Ada\"}"
    }));
    let (shape, record) = classify(&raw).expect("recognized");
    assert_eq!(shape, Shape::CommandReply);
    assert_eq!(record.id(), "u1");
    assert_eq!(record.name(), Some("Ada"));
    assert!(record.extra().is_empty());
}

#[test]
fn userinfo_reply_with_object_data() {
    let raw = RawInbound::Value(json!({
        "name": "userinfo",
        "data": {"id": "u1", "email": "ada@example.com"}
    }));
    let record = normalize(&raw).expect("recognized");
    assert_eq!(record.email(), Some("ada@example.com"));
}

#[test]
fn userid_reply_carries_only_the_id() {
    let raw = RawInbound::Value(json!({"name": "userid", "data": "u2"}));
    let record = normalize(&raw).expect("recognized");
    assert_eq!(record.id(), "u2");
    assert_eq!(
        serde_json::to_value(&record).expect("serializes"),
        json!({"id": "u2"})
    );
}

#[test]
fn userid_reply_with_numeric_id() {
    assert_eq!(
        id_of(RawInbound::Value(json!({"name": "userid", "data": 42}))),
        Some("42".to_owned())
    );
}

#[test]
fn whole_reply_as_json_text() {
    let text = json!({"name": "userid", "data": "u3"}).to_string();
    assert_eq!(id_of(RawInbound::Text(text)), Some("u3".to_owned()));
}

#[test]
fn tagged_envelope_by_type() {
    let raw = RawInbound::Value(json!({
        "type": "USER_INFO",
        "payload": {"id": "t1", "name": "Lin"}
    }));
    let (shape, record) = classify(&raw).expect("recognized");
    assert_eq!(shape, Shape::TaggedEnvelope);
    assert_eq!(record.id(), "t1");
}

#[test]
fn tagged_envelope_by_source() {
    let raw = RawInbound::Value(json!({
        "source": "townpass",
        "data": "{\"id\":\"s1\"}"
    }));
    assert_eq!(id_of(raw), Some("s1".to_owned()));
}

#[test]
fn tagged_envelope_beats_nested_user() {
    let raw = RawInbound::Value(json!({
        "type": "userinfo",
        "payload": {"id": "from-payload"},
        "user": {"id": "from-user"}
    }));
    assert_eq!(id_of(raw), Some("from-payload".to_owned()));
}

#[test]
fn townpass_user_key() {
    let raw = RawInbound::Value(json!({"townpass_user": {"id": "tp1"}}));
    let (shape, record) = classify(&raw).expect("recognized");
    assert_eq!(shape, Shape::NestedUser);
    assert_eq!(record.id(), "tp1");
}

#[test]
fn nested_user_beats_command_reply() {
    let raw = RawInbound::Value(json!({
        "name": "userid",
        "data": "from-reply",
        "user": {"id": "from-user"}
    }));
    assert_eq!(id_of(raw), Some("from-user".to_owned()));
}

#[test]
fn bare_identity_keeps_identifier_exactly() {
    for id in ["u1", "  padded  ", "ÜNICODE-äöü", "0001"] {
        let raw = RawInbound::Value(json!({"id": id}));
        assert_eq!(id_of(raw), Some(id.to_owned()));
    }
}

#[test]
fn bare_identity_alias_keys() {
    for key in ["userId", "user_id", "uid"] {
        let raw = RawInbound::Value(json!({ key: "alias" }));
        assert_eq!(id_of(raw), Some("alias".to_owned()), "key {key}");
    }
}

#[test]
fn message_event_data() {
    let raw = RawInbound::Event(HostEvent::message(json!({"name": "userid", "data": "m1"})));
    assert_eq!(id_of(raw), Some("m1".to_owned()));
}

#[test]
fn custom_event_detail() {
    let raw = RawInbound::Event(HostEvent::custom(json!({"id": "d1"})));
    let (shape, record) = classify(&raw).expect("recognized");
    assert_eq!(shape, Shape::EventDetail);
    assert_eq!(record.id(), "d1");
}

#[test]
fn detail_key_inside_object() {
    let raw = RawInbound::Value(json!({"detail": "{\"id\":\"d2\"}"}));
    let (shape, _) = classify(&raw).expect("recognized");
    assert_eq!(shape, Shape::EventDetail);
}

#[test]
fn unrecognized_values_never_panic() {
    let samples = [
        RawInbound::Text(String::new()),
        RawInbound::Text("not json".to_owned()),
        RawInbound::Text("{\"id\":".to_owned()),
        RawInbound::Text("[1,2,3]".to_owned()),
        RawInbound::Text("\"u1\"".to_owned()),
        RawInbound::Value(json!(null)),
        RawInbound::Value(json!(17)),
        RawInbound::Value(json!({})),
        RawInbound::Value(json!({"name": "userinfo", "data": null})),
        RawInbound::Value(json!({"name": "userid", "data": ""})),
        RawInbound::Value(json!({"name": "other", "data": {"x": 1}})),
        RawInbound::Value(json!({"type": "townpass:request", "action": "userinfo"})),
        RawInbound::Value(json!({"user": null, "id": null})),
        RawInbound::Value(json!({"id": {"nested": true}})),
        RawInbound::Event(HostEvent::default()),
    ];
    for raw in samples {
        assert!(normalize(&raw).is_none(), "unexpectedly recognized {raw:?}");
    }
}

#[test]
fn normalize_value_matches_normalize() {
    let value = json!({"user": {"id": "v1"}});
    assert_eq!(
        normalize_value(&value),
        normalize(&RawInbound::Value(value.clone()))
    );
}
