use thiserror::Error;

/// Failure taxonomy shared by every orchestrator operation.
///
/// Each variant maps to a stable code so the MCP boundary can report it
/// without string matching. Variants carrying `output` hold the captured
/// stdout/stderr of the external process that failed.
#[derive(Debug, Error)]
pub enum PerfError {
    #[error("failed to fetch compose source '{source_ref}': {message}")]
    Fetch { source_ref: String, message: String },

    #[error("invalid compose content: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("failed to start containers for project '{project}': {message}")]
    ContainerStart {
        project: String,
        message: String,
        output: String,
    },

    #[error("load test execution failed: {message}")]
    Execution { message: String, output: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("operation cancelled")]
    Cancelled,
}

pub type PerfResult<T> = Result<T, PerfError>;

impl PerfError {
    pub fn code(&self) -> &'static str {
        match self {
            PerfError::Fetch { .. } => "E_FETCH",
            PerfError::Validation(_) => "E_VALIDATION",
            PerfError::Store(_) => "E_STORE",
            PerfError::ContainerStart { .. } => "E_CONTAINER_START",
            PerfError::Execution { .. } => "E_EXECUTION",
            PerfError::NotFound { .. } => "E_NOT_FOUND",
            PerfError::Cancelled => "E_CANCELLED",
        }
    }

    /// Raw output of the failing external process, when there is one.
    pub fn output(&self) -> Option<&str> {
        match self {
            PerfError::ContainerStart { output, .. } | PerfError::Execution { output, .. }
                if !output.trim().is_empty() =>
            {
                Some(output.as_str())
            }
            _ => None,
        }
    }

    pub fn store(err: anyhow::Error) -> Self {
        // {:#} keeps the context chain on one line
        PerfError::Store(format!("{err:#}"))
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PerfError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PerfError::Cancelled)
    }
}
