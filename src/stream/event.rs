//! Stream records and their classification relative to the session's user.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upstream event kinds that the classifier knows by name.
pub mod kind {
    pub const MESSAGE_CREATE: &str = "message.create";
    pub const MESSAGE_DELETE: &str = "message.delete";
    pub const FAV_CREATE: &str = "fav.create";
    pub const FAV_DELETE: &str = "fav.delete";
    pub const DM_CREATE: &str = "dm.create";
    pub const FRIENDS_CREATE: &str = "friends.create";
    pub const FRIENDS_REQUEST: &str = "friends.request";
    pub const FRIENDS_DELETE: &str = "friends.delete";
    pub const USER_UPDATE_PROFILE: &str = "user.updateprofile";
}

/// One decoded event from the user stream.
///
/// Decoding never rejects a JSON object: ids and text accept strings or
/// numbers, and values of any other shape are kept verbatim in `extra`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(from = "Map<String, Value>")]
pub struct Record {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Actor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Actor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<EventObject>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A user referenced by a record.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(from = "Map<String, Value>")]
pub struct Actor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

/// The subject of a record: a message, a favorited message, or a profile.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(from = "Map<String, Value>")]
pub struct EventObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_status_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_user_id: Option<String>,
    /// Author of the message the object refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Actor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for Record {
    fn from(mut fields: Map<String, Value>) -> Self {
        Self {
            event: take_scalar(&mut fields, "event"),
            created_at: take_scalar(&mut fields, "created_at"),
            source: take_nested(&mut fields, "source"),
            target: take_nested(&mut fields, "target"),
            object: take_nested(&mut fields, "object"),
            extra: fields,
        }
    }
}

impl From<Map<String, Value>> for Actor {
    fn from(mut fields: Map<String, Value>) -> Self {
        Self {
            id: take_scalar(&mut fields, "id"),
            profile: fields,
        }
    }
}

impl From<Map<String, Value>> for EventObject {
    fn from(mut fields: Map<String, Value>) -> Self {
        Self {
            id: take_scalar(&mut fields, "id"),
            text: take_scalar(&mut fields, "text"),
            in_reply_to_user_id: take_scalar(&mut fields, "in_reply_to_user_id"),
            repost_status_id: take_scalar(&mut fields, "repost_status_id"),
            repost_user_id: take_scalar(&mut fields, "repost_user_id"),
            user: take_nested(&mut fields, "user"),
            extra: fields,
        }
    }
}

/// Removes `key` as text. Numbers are rendered in decimal; other shapes stay in `fields`.
fn take_scalar(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Null => None,
        other => {
            fields.insert(key.to_string(), other);
            None
        }
    }
}

fn take_nested<T: From<Map<String, Value>>>(
    fields: &mut Map<String, Value>,
    key: &str,
) -> Option<T> {
    match fields.remove(key)? {
        Value::Object(nested) => Some(T::from(nested)),
        Value::Null => None,
        other => {
            fields.insert(key.to_string(), other);
            None
        }
    }
}

impl Record {
    fn source_id(&self) -> Option<&str> {
        self.source.as_ref()?.id.as_deref()
    }

    fn target_id(&self) -> Option<&str> {
        self.target.as_ref()?.id.as_deref()
    }

    fn object_author_id(&self) -> Option<&str> {
        self.object.as_ref()?.user.as_ref()?.id.as_deref()
    }

    /// Replaces HTML entities in the object's text with their characters.
    pub fn decode_text_entities(&mut self) {
        let Some(text) = self.object.as_mut().and_then(|object| object.text.as_mut()) else {
            return;
        };
        let decoded = match html_escape::decode_html_entities(text.as_str()) {
            Cow::Owned(decoded) => decoded,
            Cow::Borrowed(_) => return,
        };
        *text = decoded;
    }
}

/// Classification of a record relative to the session's own identity.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Category {
    /// A message authored by the session's own user.
    MessageCreated,
    MessageReply,
    MessageRepost,
    MessageMention,
    MessageDeleted,
    FavoriteAdded,
    FavoriteRemoved,
    DirectMessageCreated,
    FriendRequestCreated,
    FriendRequestPending,
    FriendRemoved,
    ProfileUpdated,
    /// Records with no event kind, or addressed to other users.
    Garbage,
    /// Event kinds this crate has no name for, passed through verbatim.
    Other(String),
}

impl Category {
    /// Maps an upstream event kind to its unfiltered category.
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            kind::MESSAGE_CREATE => Self::MessageCreated,
            kind::MESSAGE_DELETE => Self::MessageDeleted,
            kind::FAV_CREATE => Self::FavoriteAdded,
            kind::FAV_DELETE => Self::FavoriteRemoved,
            kind::DM_CREATE => Self::DirectMessageCreated,
            kind::FRIENDS_CREATE => Self::FriendRequestCreated,
            kind::FRIENDS_REQUEST => Self::FriendRequestPending,
            kind::FRIENDS_DELETE => Self::FriendRemoved,
            kind::USER_UPDATE_PROFILE => Self::ProfileUpdated,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::MessageCreated => kind::MESSAGE_CREATE,
            Self::MessageReply => "message.reply",
            Self::MessageRepost => "message.repost",
            Self::MessageMention => "message.mention",
            Self::MessageDeleted => kind::MESSAGE_DELETE,
            Self::FavoriteAdded => kind::FAV_CREATE,
            Self::FavoriteRemoved => kind::FAV_DELETE,
            Self::DirectMessageCreated => kind::DM_CREATE,
            Self::FriendRequestCreated => kind::FRIENDS_CREATE,
            Self::FriendRequestPending => kind::FRIENDS_REQUEST,
            Self::FriendRemoved => kind::FRIENDS_DELETE,
            Self::ProfileUpdated => kind::USER_UPDATE_PROFILE,
            Self::Garbage => "garbage",
            Self::Other(kind) => kind,
        }
    }

    /// Whether records of this category carry message text worth decoding.
    pub fn has_message_text(&self) -> bool {
        matches!(
            self,
            Self::MessageCreated
                | Self::MessageReply
                | Self::MessageRepost
                | Self::MessageMention
                | Self::FavoriteAdded
                | Self::FavoriteRemoved
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies `record` from the point of view of the user `self_id`.
///
/// Rules are checked in order and the first match wins:
/// - no or empty event kind: `Garbage`;
/// - `message.create`: own message, then reply to us, then repost of ours,
///   otherwise a mention;
/// - favorites count only when the favorited message is ours;
/// - direct messages and friend events count only when they target us;
/// - everything else passes through by kind.
pub fn classify(record: &Record, self_id: &str) -> Category {
    let Some(event) = record.event.as_deref().filter(|event| !event.is_empty()) else {
        return Category::Garbage;
    };

    match event {
        kind::MESSAGE_CREATE => classify_message(record, self_id),
        kind::FAV_CREATE | kind::FAV_DELETE => {
            if record.object_author_id() == Some(self_id) {
                Category::from_kind(event)
            } else {
                Category::Garbage
            }
        }
        kind::DM_CREATE | kind::FRIENDS_CREATE | kind::FRIENDS_REQUEST => {
            if record.target_id() == Some(self_id) {
                Category::from_kind(event)
            } else {
                Category::Garbage
            }
        }
        other => Category::from_kind(other),
    }
}

fn classify_message(record: &Record, self_id: &str) -> Category {
    if record.source_id() == Some(self_id) {
        return Category::MessageCreated;
    }

    let Some(object) = record.object.as_ref() else {
        return Category::MessageMention;
    };
    if object.in_reply_to_user_id.as_deref() == Some(self_id) {
        return Category::MessageReply;
    }
    let is_repost = object
        .repost_status_id
        .as_deref()
        .is_some_and(|id| !id.is_empty());
    if is_repost && object.repost_user_id.as_deref() == Some(self_id) {
        return Category::MessageRepost;
    }
    Category::MessageMention
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{classify, Category, Record};

    const SELF_ID: &str = "7";

    fn record(value: serde_json::Value) -> Record {
        serde_json::from_value(value).expect("decode record")
    }

    #[test]
    fn missing_event_kind_is_garbage() {
        let record = record(json!({"source": {"id": "42"}}));
        assert_eq!(classify(&record, SELF_ID), Category::Garbage);
    }

    #[test]
    fn empty_event_kind_is_garbage() {
        let record = record(json!({"event": "", "target": {"id": "7"}}));
        assert_eq!(classify(&record, SELF_ID), Category::Garbage);
    }

    #[test]
    fn numeric_ids_are_compared_as_text() {
        let reply = record(json!({
            "event": "message.create",
            "source": {"id": 42},
            "object": {"id": 1001, "text": "hi", "in_reply_to_user_id": 7}
        }));
        assert_eq!(reply.source.as_ref().and_then(|a| a.id.as_deref()), Some("42"));
        assert_eq!(classify(&reply, SELF_ID), Category::MessageReply);

        let repost = record(json!({
            "event": "message.create",
            "source": {"id": 42},
            "object": {"repost_status_id": 55, "repost_user_id": 7}
        }));
        assert_eq!(classify(&repost, SELF_ID), Category::MessageRepost);

        let profile = record(json!({"event": "user.updateprofile", "object": {"id": 123}}));
        assert_eq!(classify(&profile, SELF_ID), Category::ProfileUpdated);
        assert_eq!(
            profile.object.and_then(|object| object.id).as_deref(),
            Some("123")
        );
    }

    #[test]
    fn non_object_subject_is_kept_in_extra() {
        let record = record(json!({"event": "list.subscribe", "object": [1, 2]}));
        assert!(record.object.is_none());
        assert_eq!(record.extra.get("object"), Some(&json!([1, 2])));
        assert_eq!(
            classify(&record, SELF_ID),
            Category::Other("list.subscribe".to_string())
        );
    }

    #[test]
    fn unexpected_field_shapes_do_not_reject_record() {
        let record = record(json!({
            "event": "fav.create",
            "source": "someone",
            "object": {"text": ["not", "text"], "user": {"id": true}}
        }));
        assert!(record.source.is_none());
        assert_eq!(record.extra.get("source"), Some(&json!("someone")));
        let object = record.object.as_ref().expect("object");
        assert!(object.text.is_none());
        assert_eq!(object.extra.get("text"), Some(&json!(["not", "text"])));
        assert_eq!(classify(&record, SELF_ID), Category::Garbage);
    }

    #[test]
    fn reply_to_self_is_reply() {
        let record = record(json!({
            "event": "message.create",
            "source": {"id": "42"},
            "object": {"text": "hi", "in_reply_to_user_id": "7"}
        }));
        assert_eq!(classify(&record, SELF_ID), Category::MessageReply);
    }

    #[test]
    fn own_message_is_never_reply_or_mention() {
        let record = record(json!({
            "event": "message.create",
            "source": {"id": "7"},
            "object": {"text": "talking to myself", "in_reply_to_user_id": "7"}
        }));
        assert_eq!(classify(&record, SELF_ID), Category::MessageCreated);
    }

    #[test]
    fn repost_of_own_message_is_repost() {
        let record = record(json!({
            "event": "message.create",
            "source": {"id": "42"},
            "object": {"text": "RT", "repost_status_id": "abc", "repost_user_id": "7"}
        }));
        assert_eq!(classify(&record, SELF_ID), Category::MessageRepost);
    }

    #[test]
    fn repost_user_without_status_is_mention() {
        let record = record(json!({
            "event": "message.create",
            "source": {"id": "42"},
            "object": {"text": "hey @me", "repost_user_id": "7"}
        }));
        assert_eq!(classify(&record, SELF_ID), Category::MessageMention);
    }

    #[test]
    fn favorite_on_other_users_message_is_garbage() {
        let record = record(json!({
            "event": "fav.create",
            "source": {"id": "42"},
            "object": {"text": "not mine", "user": {"id": "99"}}
        }));
        assert_eq!(classify(&record, SELF_ID), Category::Garbage);
    }

    #[test]
    fn favorite_on_own_message_keeps_kind() {
        let added = record(json!({
            "event": "fav.create",
            "object": {"user": {"id": "7"}}
        }));
        let removed = record(json!({
            "event": "fav.delete",
            "object": {"user": {"id": "7"}}
        }));
        assert_eq!(classify(&added, SELF_ID), Category::FavoriteAdded);
        assert_eq!(classify(&removed, SELF_ID), Category::FavoriteRemoved);
    }

    #[test]
    fn targeted_events_require_self_target() {
        for (kind, expected) in [
            ("dm.create", Category::DirectMessageCreated),
            ("friends.create", Category::FriendRequestCreated),
            ("friends.request", Category::FriendRequestPending),
        ] {
            let mine = record(json!({"event": kind, "target": {"id": "7"}}));
            let theirs = record(json!({"event": kind, "target": {"id": "8"}}));
            let untargeted = record(json!({"event": kind}));
            assert_eq!(classify(&mine, SELF_ID), expected);
            assert_eq!(classify(&theirs, SELF_ID), Category::Garbage);
            assert_eq!(classify(&untargeted, SELF_ID), Category::Garbage);
        }
    }

    #[test]
    fn other_kinds_pass_through() {
        let known = record(json!({"event": "user.updateprofile"}));
        let unknown = record(json!({"event": "list.subscribe"}));
        assert_eq!(classify(&known, SELF_ID), Category::ProfileUpdated);
        assert_eq!(
            classify(&unknown, SELF_ID),
            Category::Other("list.subscribe".to_string())
        );
        assert_eq!(classify(&unknown, SELF_ID).as_str(), "list.subscribe");
    }

    #[test]
    fn classification_is_deterministic() {
        let record = record(json!({
            "event": "message.create",
            "source": {"id": "42"},
            "object": {"text": "@me hello"}
        }));
        let first = classify(&record, SELF_ID);
        for _ in 0..3 {
            assert_eq!(classify(&record, SELF_ID), first);
        }
        assert_eq!(first, Category::MessageMention);
    }

    #[test]
    fn decode_text_entities_rewrites_text() {
        let mut record = record(json!({
            "event": "message.create",
            "object": {"text": "a &lt;b&gt; &amp; &quot;c&quot;"}
        }));
        record.decode_text_entities();
        assert_eq!(
            record.object.and_then(|object| object.text).as_deref(),
            Some("a <b> & \"c\"")
        );
    }

    #[test]
    fn unknown_fields_survive_decoding() {
        let record = record(json!({
            "event": "message.create",
            "source": {"id": "42", "screen_name": "someone"},
            "object": {"id": "m1", "photo": {"url": "x"}},
            "extra_field": 1
        }));
        assert_eq!(record.extra.get("extra_field"), Some(&json!(1)));
        let source = record.source.expect("source");
        assert_eq!(source.profile.get("screen_name"), Some(&json!("someone")));
        let object = record.object.expect("object");
        assert!(object.extra.contains_key("photo"));
    }

    #[test]
    fn category_names_round_trip_through_kind() {
        for name in [
            "message.create",
            "message.delete",
            "fav.create",
            "fav.delete",
            "dm.create",
            "friends.create",
            "friends.request",
            "friends.delete",
            "user.updateprofile",
        ] {
            assert_eq!(Category::from_kind(name).as_str(), name);
        }
    }
}
