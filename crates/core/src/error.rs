use std::time::Duration;

/// Errors `analyze` can surface to its caller. Source failures and uncertain
/// classifications are absorbed inside the pipeline and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("analysis did not finish within {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
