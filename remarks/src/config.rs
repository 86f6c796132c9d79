use crate::error::RemarksError;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the optional per-workspace configuration file.
pub const CONFIG_FILE_NAME: &str = ".optinfo.toml";

/// Which loop/function locator to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorKind {
    #[default]
    Regex,
    AstTool,
}

/// Configuration for remark collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemarksConfig {
    /// Shell that runs the compile command. Must support process
    /// substitution for the default record flags.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Flags appended to the compile command
    #[serde(default = "default_record_flags")]
    pub record_flags: Vec<String>,

    /// Give up on the compiler after this many seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,

    /// Workspace subdirectories containing one of these are searched for a
    /// compile database
    #[serde(default = "default_build_dir_markers")]
    pub build_dir_markers: Vec<String>,

    /// Directory holding `compile_commands.json`, relative to the workspace
    #[serde(default)]
    pub compile_commands_dir: Option<PathBuf>,

    /// Source file extensions remarks can be collected for
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// Loop/function locator
    #[serde(default)]
    pub locator: LocatorKind,

    /// Compiler used by the AST-backed locator
    #[serde(default = "default_ast_tool")]
    pub ast_tool: String,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_record_flags() -> Vec<String> {
    [
        "-c",
        "-o",
        "/dev/null",
        "-fsave-optimization-record",
        "-foptimization-record-file=>(cat)",
    ]
    .into_iter()
    .map(ToString::to_string)
    .collect()
}

fn default_timeout_secs() -> Option<u64> {
    Some(300)
}

fn default_build_dir_markers() -> Vec<String> {
    vec!["build".to_string(), "out".to_string()]
}

fn default_source_extensions() -> Vec<String> {
    [".c", ".cpp", ".cc", ".c++", ".cxx", ".cp", ".m"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

fn default_ast_tool() -> String {
    "clang".to_string()
}

impl Default for RemarksConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            record_flags: default_record_flags(),
            timeout_secs: default_timeout_secs(),
            build_dir_markers: default_build_dir_markers(),
            compile_commands_dir: None,
            source_extensions: default_source_extensions(),
            locator: LocatorKind::default(),
            ast_tool: default_ast_tool(),
        }
    }
}

impl RemarksConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate().map_err(RemarksError::Config)?;
        Ok(config)
    }

    /// `.optinfo.toml` at the workspace root, or the defaults when absent
    pub fn load_from_workspace(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        tracing::debug!(path = %path.display(), "loading workspace configuration");
        Self::load(&path)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.shell.trim().is_empty() {
            return Err("shell must not be empty".to_string());
        }

        if self.timeout_secs == Some(0) {
            return Err("timeout_secs must be > 0".to_string());
        }

        if self.source_extensions.is_empty() {
            return Err("source_extensions must not be empty".to_string());
        }

        if self.locator == LocatorKind::AstTool && self.ast_tool.trim().is_empty() {
            return Err("ast_tool must be set for the ast-tool locator".to_string());
        }

        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Whether `path` looks like a C-family source file (case-insensitive).
    pub fn is_supported_source(&self, path: &Path) -> bool {
        let name = path.to_string_lossy().to_ascii_lowercase();
        self.source_extensions
            .iter()
            .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
    }
}
