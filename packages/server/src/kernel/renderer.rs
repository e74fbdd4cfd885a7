use anyhow::Result;
use serde_json::{json, Value};

use super::BaseNotificationRenderer;

/// Discord-compatible plain message: one content line plus a short summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatMessageRenderer;

const MAX_CONTENT_LEN: usize = 1900;

fn summary(payload: &Value) -> Option<String> {
    ["title", "message", "text", "summary"]
        .iter()
        .find_map(|field| payload.get(field).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl BaseNotificationRenderer for ChatMessageRenderer {
    fn render_notification(&self, kind: &str, entity_id: &str, payload: &Value) -> Result<Value> {
        let mut content = format!("**{}** `{}`", kind.replace('_', " "), entity_id);
        if let Some(summary) = summary(payload) {
            content.push('\n');
            content.push_str(&summary);
        }
        if content.len() > MAX_CONTENT_LEN {
            let mut cut = MAX_CONTENT_LEN;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push('…');
        }

        Ok(json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_kind_entity_and_summary() {
        let rendered = ChatMessageRenderer
            .render_notification("pull_request_activity", "acme/api#7", &json!({"title": "Fix it"}))
            .unwrap();

        assert_eq!(rendered["content"], "**pull request activity** `acme/api#7`\nFix it");
    }

    #[test]
    fn test_long_content_is_truncated() {
        let long = "x".repeat(5000);
        let rendered = ChatMessageRenderer
            .render_notification("external_event", "e1", &json!({"message": long}))
            .unwrap();

        assert!(rendered["content"].as_str().unwrap().chars().count() <= MAX_CONTENT_LEN + 1);
    }
}
