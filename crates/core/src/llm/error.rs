use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// Carries the raw model output along with the failure so callers can log or
/// persist exactly what the provider returned.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub task: &'static str,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    /// Rate limits and 5xx responses are worth another attempt; everything else is not.
    pub fn is_transient(&self) -> bool {
        self.stage == "http"
            && (self.detail.contains("429") || self.detail.contains("status=5"))
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, task={}, stage={}): {}",
            self.provider.as_str(),
            self.task,
            self.stage,
            self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(stage: &'static str, detail: &str) -> LlmDiagnosticsError {
        LlmDiagnosticsError {
            provider: Provider::Anthropic,
            task: "classify_post",
            stage,
            detail: detail.to_string(),
            raw_output: None,
            raw_response_json: None,
        }
    }

    #[test]
    fn transient_only_for_rate_limits_and_server_errors() {
        assert!(err("http", "status=429 Too Many Requests").is_transient());
        assert!(err("http", "status=503 Service Unavailable").is_transient());
        assert!(!err("http", "status=400 Bad Request").is_transient());
        assert!(!err("parse_after_repair", "status=500").is_transient());
    }
}
