//! Document preparation before a record is staged.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use khub_shared::{Record, RecordExt};

/// Identifier field as the sources deliver it.
pub const ID_FIELD: &str = "id";
/// Primary-key field of a staged document.
pub const KEY_FIELD: &str = "_id";

/// Characters a field name may not contain.
static ILLEGAL_FIELD_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.$@]").expect("valid regex"));

/// A record ready to be written: sanitized body and its primary key, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDocument {
    pub key: Option<String>,
    pub body: Value,
}

/// Prepare a record for storage. Non-object records yield `None`.
pub fn prepare_document(record: &Record) -> Option<PreparedDocument> {
    if !record.is_object() {
        return None;
    }

    let mut body = sanitize_field_names(record.clone());
    if let Some(id) = body.remove_field(ID_FIELD) {
        body.set_field(KEY_FIELD, id);
    }
    let key = body.id_at(KEY_FIELD);

    Some(PreparedDocument { key, body })
}

/// Strip illegal characters from every field name, at every nesting level.
pub fn sanitize_field_names(value: Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(name, value)| {
                    let name = ILLEGAL_FIELD_CHARS.replace_all(&name, "").into_owned();
                    (name, sanitize_field_names(value))
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_field_names).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_illegal_characters_at_every_level() {
        let cleaned = sanitize_field_names(json!({
            "@odata.context": "https://graph",
            "body": { "$type": "html", "content.v2": "x" },
            "mentions": [{ "user@id": 1 }]
        }));
        assert_eq!(
            cleaned,
            json!({
                "odatacontext": "https://graph",
                "body": { "type": "html", "contentv2": "x" },
                "mentions": [{ "userid": 1 }]
            })
        );
    }

    #[test]
    fn values_are_left_untouched() {
        let cleaned = sanitize_field_names(json!({ "link": "a.b@c$d" }));
        assert_eq!(cleaned.str_at("link"), Some("a.b@c$d"));
    }

    #[test]
    fn id_becomes_primary_key() {
        let prepared = prepare_document(&json!({ "id": 65545, "title": "Home" })).unwrap();
        assert_eq!(prepared.key.as_deref(), Some("65545"));
        assert!(!prepared.body.has_field("id"));
        assert_eq!(prepared.body["_id"], json!(65545));
    }

    #[test]
    fn string_id_keeps_its_type() {
        let prepared = prepare_document(&json!({ "id": "19:abc@thread.tacv2" })).unwrap();
        assert_eq!(prepared.key.as_deref(), Some("19:abc@thread.tacv2"));
        assert_eq!(prepared.body, json!({ "_id": "19:abc@thread.tacv2" }));
    }

    #[test]
    fn only_top_level_id_is_renamed() {
        let prepared = prepare_document(&json!({ "id": "p1", "ancestors": [{ "id": "p0" }] })).unwrap();
        assert_eq!(prepared.body.at("ancestors").unwrap()[0].str_at("id"), Some("p0"));
    }

    #[test]
    fn record_without_id_has_no_key() {
        let prepared = prepare_document(&json!({ "name": "site admins" })).unwrap();
        assert_eq!(prepared.key, None);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(prepare_document(&json!("text")).is_none());
        assert!(prepare_document(&json!([1, 2])).is_none());
        assert!(prepare_document(&Value::Null).is_none());
    }
}
