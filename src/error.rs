use std::error::Error;
use std::fmt;

use crate::llm::LlmError;

/// Failure taxonomy shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Malformed schema or an irreconcilable name collision.
    Validation(String),
    /// A dangerous operation was rejected before execution.
    Policy(String),
    /// The completion service returned an empty or malformed query.
    Generation(String),
    /// An external call exceeded its deadline.
    Timeout(String),
    /// The data source raised a fault during a real run. Always sanitized.
    Execution(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation_error",
            PipelineError::Policy(_) => "policy_error",
            PipelineError::Generation(_) => "generation_error",
            PipelineError::Timeout(_) => "timeout_error",
            PipelineError::Execution(_) => "execution_fault",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Validation(msg) => write!(f, "Validation error: {}", msg),
            PipelineError::Policy(msg) => write!(f, "Policy error: {}", msg),
            PipelineError::Generation(msg) => write!(f, "Generation error: {}", msg),
            PipelineError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            PipelineError::Execution(msg) => write!(f, "Execution fault: {}", msg),
        }
    }
}

impl Error for PipelineError {}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(deadline) => PipelineError::Timeout(format!(
                "completion service did not answer within {}s",
                deadline.as_secs_f64()
            )),
            other => PipelineError::Generation(other.to_string()),
        }
    }
}
