use thiserror::Error;

/// Failures surfaced by the probe workflows.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to reach {host}: {detail}")]
    Connection { host: String, detail: String },

    #[error("template definition invalid: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("template render failed: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("json document handling failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml document handling failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("cannot patch `{path}`: {detail}")]
    Patch { path: String, detail: String },

    #[error("command `{command}` exited with code {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("unrecognized resource status `{0}`")]
    UnexpectedState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    pub fn patch(path: &str, detail: impl Into<String>) -> Self {
        ProbeError::Patch {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}
