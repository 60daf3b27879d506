use crate::config::{env_parse, Settings};
use crate::domain::contract::{LlmClassification, LlmPostBatch};
use crate::domain::post::Post;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{InferPostsInput, LlmClient, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_EMIT_POSTS: &str = "emit_posts";
const TOOL_NAME_EMIT_CLASSIFICATION: &str = "emit_classification";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

/// One structured-output task: which tool the model is forced to call and how to
/// talk it back into shape when it answers in prose instead.
struct Task {
    name: &'static str,
    tool: &'static str,
    tool_description: &'static str,
    schema: serde_json::Value,
    system: String,
    user: String,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = env_parse::<u32>("ANTHROPIC_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS);
        let timeout_secs = env_parse::<u64>("ANTHROPIC_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        task: &'static str,
        req: &CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        match self.create_message_once(task, req).await {
            Err(err)
                if err
                    .downcast_ref::<LlmDiagnosticsError>()
                    .is_some_and(LlmDiagnosticsError::is_transient) =>
            {
                tracing::warn!(task, error = %err, "Anthropic transient failure; retrying once");
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.create_message_once(task, req).await
            }
            other => other,
        }
    }

    async fn create_message_once(
        &self,
        task: &'static str,
        req: &CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                task,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn posts_task(input: &InferPostsInput) -> Task {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["posts"],
            "properties": {
                "posts": {
                    "type": "array",
                    "maxItems": input.max_count,
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["id", "username", "display_name", "content", "timestamp", "likes", "retweets", "image_urls", "impact", "tickers"],
                        "properties": {
                            "id": {"type": ["string", "null"]},
                            "username": {"type": "string"},
                            "display_name": {"type": ["string", "null"]},
                            "verified": {"type": ["boolean", "null"]},
                            "content": {"type": "string"},
                            "timestamp": {"type": ["string", "null"]},
                            "likes": {"type": ["integer", "null"]},
                            "retweets": {"type": ["integer", "null"]},
                            "image_urls": {"type": "array", "items": {"type": "string"}},
                            "impact": {"enum": ["high", "medium", "low", "unknown", null]},
                            "tickers": ticker_tags_schema()
                        }
                    }
                }
            }
        });

        let system = [
            "You surface recent social-media posts that move US equity markets.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{\"posts\": [{\"id\": \"...\", \"username\": \"...\", \"display_name\": \"...\", \"content\": \"...\",",
            "  \"timestamp\": \"ISO-8601\", \"likes\": 0, \"retweets\": 0, \"image_urls\": [],",
            "  \"impact\": \"high|medium|low|unknown\",",
            "  \"tickers\": [{\"ticker\": \"AAPL\", \"direction\": \"bullish|bearish|neutral\"}]}]}",
            "Rules:",
            "- Only include posts you have evidence for; never invent authors",
            "- content must be the post text, not a summary",
            "- timestamp must not be in the future",
            "- direction is null when the post takes no position on that ticker",
        ]
        .join("\n");

        let user = format!(
            "Task: Return up to {} of the most recent market-relevant posts as of {} that mention or were written by any of: {}.",
            input.max_count,
            input.now.to_rfc3339(),
            input.queries.join(", ")
        );

        Task {
            name: "infer_posts",
            tool: TOOL_NAME_EMIT_POSTS,
            tool_description: "Emit the recent posts as structured JSON",
            schema,
            system,
            user,
        }
    }

    fn classification_task(post: &Post, watched: &BTreeSet<String>) -> Task {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["mentions", "confidence"],
            "properties": {
                "mentions": ticker_tags_schema(),
                "confidence": {"type": "number", "minimum": 0, "maximum": 1}
            }
        });

        let system = [
            "You classify the market impact of a single social-media post.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{\"mentions\": [{\"ticker\": \"AAPL\", \"direction\": \"bullish|bearish|neutral\"}], \"confidence\": 0.0}",
            "Rules:",
            "- Only list tickers from the watched set",
            "- Decide direction per ticker independently",
            "- Use an empty mentions list when the post is unrelated",
            "- confidence must be in [0, 1]; use a low value when unsure",
        ]
        .join("\n");

        let user = format!(
            "Watched tickers: {}\n\nPost by @{}:\n{}",
            watched.iter().cloned().collect::<Vec<_>>().join(", "),
            post.author.username,
            post.content
        );

        Task {
            name: "classify_post",
            tool: TOOL_NAME_EMIT_CLASSIFICATION,
            tool_description: "Emit the per-ticker classification as structured JSON",
            schema,
            system,
            user,
        }
    }

    fn repair_prompt(task: &Task, previous_output: &str) -> String {
        format!(
            "Your previous message was NOT valid JSON.\n\n\
TASK: Output ONLY a single JSON object that exactly matches the schema and rules.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- Do NOT include trailing commas, comments, or semicolons.\n\
- Use double quotes for all JSON strings.\n\n\
SCHEMA:\n{}\n\n\
ORIGINAL TASK:\n{}\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}",
            task.schema, task.user
        )
    }

    fn request(&self, task: &Task, content: String, max_tokens: u32) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(task.system.clone()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(vec![Tool {
                name: task.tool,
                description: task.tool_description,
                input_schema: task.schema.clone(),
            }]),
            tool_choice: Some(ToolChoice::Tool { name: task.tool }),
        }
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_input<T: DeserializeOwned>(
        res: &CreateMessageResponse,
        tool: &str,
    ) -> anyhow::Result<Option<T>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == tool {
                    let parsed = serde_json::from_value::<T>(input.clone())
                        .with_context(|| format!("failed to decode tool_use.input for {tool}"))?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    async fn run_task<T: DeserializeOwned>(&self, task: Task) -> anyhow::Result<T> {
        let (_raw_json, mut res) = self
            .create_message(task.name, &self.request(&task, task.user.clone(), self.max_tokens))
            .await?;

        // If the model hit max_tokens, retry once with a higher ceiling.
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.max_tokens.saturating_mul(2).max(4096);
            tracing::warn!(
                task = task.name,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (_, r) = self
                .create_message(task.name, &self.request(&task, task.user.clone(), bumped))
                .await?;
            res = r;
        }

        // Tool output path.
        if let Some(parsed) = Self::response_tool_input::<T>(&res, task.tool)? {
            return Ok(parsed);
        }

        // Fallback to text (should be rare).
        let text = Self::response_text(&res);
        self.try_parse_with_repairs(&task, text).await
    }

    async fn try_parse_with_repairs<T: DeserializeOwned>(
        &self,
        task: &Task,
        initial_text: String,
    ) -> anyhow::Result<T> {
        let mut last_err = match json::parse_json::<T>(&initial_text, task.name) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => err,
        };
        let mut last_text = initial_text;
        let mut last_raw_json = None;

        // Repair attempts: 2
        for attempt in 1..=2u32 {
            let req = self.request(task, Self::repair_prompt(task, &last_text), self.max_tokens);
            let (repair_raw_json, repair_res) = self.create_message(task.name, &req).await?;
            if let Some(parsed) = Self::response_tool_input::<T>(&repair_res, task.tool)? {
                return Ok(parsed);
            }
            let repair_text = Self::response_text(&repair_res);
            match json::parse_json::<T>(&repair_text, task.name) {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        task = task.name,
                        error = %err,
                        "LLM output still invalid after repair attempt"
                    );
                    last_err = err;
                    last_text = repair_text;
                    last_raw_json = Some(repair_raw_json);
                }
            }
        }

        Err(LlmDiagnosticsError {
            provider: Provider::Anthropic,
            task: task.name,
            stage: "parse_after_repair",
            detail: format!("final_error={last_err}"),
            raw_output: Some(last_text),
            raw_response_json: last_raw_json,
        }
        .into())
    }
}

fn ticker_tags_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "additionalProperties": false,
            "required": ["ticker", "direction"],
            "properties": {
                "ticker": {"type": "string"},
                "direction": {"enum": ["bullish", "bearish", "neutral", null]}
            }
        }
    })
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn infer_posts(&self, input: InferPostsInput) -> anyhow::Result<Vec<Post>> {
        let batch: LlmPostBatch = self.run_task(Self::posts_task(&input)).await?;
        batch.validate_and_into_posts(input.max_count, input.now)
    }

    async fn classify_post(
        &self,
        post: &Post,
        watched: &BTreeSet<String>,
    ) -> anyhow::Result<LlmClassification> {
        self.run_task(Self::classification_task(post, watched)).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sentiment::Direction;
    use serde_json::json;

    #[test]
    fn parses_tool_use_classification_input() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {
                    "type": "tool_use",
                    "id": "toolu_1",
                    "name": TOOL_NAME_EMIT_CLASSIFICATION,
                    "input": {
                        "mentions": [{"ticker": "AAPL", "direction": "bullish"}],
                        "confidence": 0.82
                    }
                }
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        let parsed: LlmClassification =
            AnthropicClient::response_tool_input(&res, TOOL_NAME_EMIT_CLASSIFICATION)
                .unwrap()
                .unwrap();
        assert_eq!(parsed.mentions.len(), 1);
        assert_eq!(parsed.mentions[0].direction, Some(Direction::Bullish));
    }

    #[test]
    fn ignores_tool_use_for_other_tools() {
        let res: CreateMessageResponse = serde_json::from_value(json!({
            "content": [
                {"type": "tool_use", "name": "something_else", "input": {}},
                {"type": "text", "text": "{\"posts\": []}"}
            ]
        }))
        .unwrap();

        let parsed: Option<LlmPostBatch> =
            AnthropicClient::response_tool_input(&res, TOOL_NAME_EMIT_POSTS).unwrap();
        assert!(parsed.is_none());
        assert_eq!(AnthropicClient::response_text(&res), "{\"posts\": []}");
    }

    #[test]
    fn classification_prompt_lists_watched_tickers() {
        let post: Post = serde_json::from_value(json!({
            "id": "1",
            "author": {"username": "trader", "display_name": "Trader"},
            "content": "$NVDA looks heavy here",
            "timestamp": "2026-03-02T15:00:00Z",
            "engagement": {"likes": 1, "retweets": 0},
            "impact_label": "low"
        }))
        .unwrap();
        let watched: BTreeSet<String> = ["NVDA".to_string(), "AMD".to_string()].into();
        let task = AnthropicClient::classification_task(&post, &watched);
        assert!(task.user.contains("AMD, NVDA"));
        assert!(task.user.contains("@trader"));
        assert_eq!(task.tool, TOOL_NAME_EMIT_CLASSIFICATION);
    }
}
