use crate::domain::contract::{LlmClassification, LlmPostBatch};
use crate::domain::post::Post;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_json<T: DeserializeOwned>(text: &str, what: &str) -> anyhow::Result<T> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    serde_json::from_str::<T>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for {what} schema: {json_str}"))
}

pub fn parse_posts(text: &str, max_count: usize, now: DateTime<Utc>) -> anyhow::Result<Vec<Post>> {
    parse_json::<LlmPostBatch>(text, "post batch")?.validate_and_into_posts(max_count, now)
}

pub fn parse_classification(text: &str) -> anyhow::Result<LlmClassification> {
    parse_json::<LlmClassification>(text, "classification")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn parse_posts_accepts_prose_wrapped_json() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        let body = json!({
            "posts": [
                {"id": "1", "username": "a", "content": "$TSLA to the moon"},
                {"id": "2", "username": "b", "content": "$TSLA recall news"}
            ]
        });
        let text = format!("Here you go:\n{body}\nLet me know.");
        let posts = parse_posts(&text, 10, now).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].id, "2");
    }

    #[test]
    fn parse_classification_rejects_missing_confidence() {
        let text = json!({"mentions": []}).to_string();
        assert!(parse_classification(&text).is_err());
    }

    #[test]
    fn parse_classification_accepts_fenced_output() {
        let text = "```json\n{\"mentions\":[{\"ticker\":\"AAPL\",\"direction\":\"neutral\"}],\"confidence\":0.8}\n```";
        let c = parse_classification(text).unwrap();
        assert_eq!(c.mentions.len(), 1);
        assert!((c.confidence - 0.8).abs() < f64::EPSILON);
    }
}
