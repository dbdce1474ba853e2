//! Boundary adapter from raw worker JSON to [`WorkerResult`].
//!
//! Workers in the field answer with several shapes: camelCase or snake_case
//! flags, lists nested under `data` or at the top level, website data under
//! `websiteData`. All of that is resolved here so nothing downstream looks at
//! raw JSON paths.

use serde_json::Value;

use crate::types::{SourcePayload, SourceType, WorkerResult};

/// Convert a raw worker response into the typed contract.
///
/// A response already carrying a typed `payload` is deserialized directly.
/// A response with no `success` field counts as successful only when it
/// carries no error.
pub fn adapt(source: SourceType, raw: &Value) -> WorkerResult {
    let error = extract_error(raw);
    let success = raw
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(error.is_none());
    let has_actual_data = first_of(raw, &[&["hasActualData"], &["has_actual_data"], &["data", "hasActualData"]])
        .and_then(Value::as_bool);

    let payload = raw
        .get("payload")
        .filter(|p| p.get("kind").is_some())
        .and_then(|p| serde_json::from_value::<SourcePayload>(p.clone()).ok())
        .unwrap_or_else(|| legacy_payload(source, raw));

    WorkerResult {
        success,
        has_actual_data,
        error,
        payload,
    }
}

fn legacy_payload(source: SourceType, raw: &Value) -> SourcePayload {
    match source {
        SourceType::Website => {
            let site = first_of(raw, &[&["websiteData"], &["website_data"], &["data", "websiteData"], &["data"]])
                .unwrap_or(raw);
            SourcePayload::Website {
                customer_reviews: strings(first_of(site, &[&["customerReviews"], &["customer_reviews"]])),
                testimonials: strings(site.get("testimonials")),
                pain_points: strings(first_of(site, &[&["painPoints"], &["pain_points"]])),
            }
        }
        SourceType::AmazonReviews => SourcePayload::Reviews {
            reviews: list(first_of(raw, &[&["data", "reviews"], &["reviews"]])),
        },
        SourceType::Reddit => SourcePayload::Discussions {
            posts: list(first_of(raw, &[&["data", "posts"], &["posts"]])),
        },
        SourceType::YoutubeComments => SourcePayload::Comments {
            comments: list(first_of(raw, &[&["data", "comments"], &["comments"]])),
        },
        SourceType::PersonaSynthesis => SourcePayload::Persona {
            text: first_of(
                raw,
                &[&["data", "persona"], &["persona"], &["personaText"], &["text"]],
            )
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        },
    }
}

fn extract_error(raw: &Value) -> Option<String> {
    match raw.get("error")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        obj @ Value::Object(_) => Some(
            obj.get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.trim().is_empty())
                .map_or_else(|| obj.to_string(), str::to_string),
        ),
        Value::Null | Value::Bool(false) | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

/// First path that resolves to a non-null value.
fn first_of<'a>(raw: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        path.iter()
            .try_fold(raw, |node, key| node.get(key))
            .filter(|v| !v.is_null())
    })
}

fn list(value: Option<&Value>) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn strings(value: Option<&Value>) -> Vec<String> {
    list(value)
        .into_iter()
        .map(|item| match item {
            Value::String(s) => s,
            Value::Object(ref obj) => obj
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| item.to_string()),
            other => other.to_string(),
        })
        .collect()
}
