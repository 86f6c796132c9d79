use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemarksError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Executable not found: {program}")]
    ToolchainMissing { program: String },

    #[error("Compile command has no program: {0:?}")]
    EmptyCommand(PathBuf),

    #[error("AST tool failed: {0}")]
    AstTool(String),
}

impl RemarksError {
    pub(crate) fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemarksError>;
