use crate::backends::Capability;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which implementation backs a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Builtin,
    External,
}

/// One backend registration from the client's initialization options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendSpec {
    pub name: String,
    pub kind: BackendKind,
    /// Higher wins; registration order breaks ties.
    #[serde(default)]
    pub priority: i32,
    pub capabilities: Vec<Capability>,
    /// Analyzer executable, `external` kind only. Tilde is expanded.
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace root; external analyzers run with this as their working
    /// directory.
    pub root_path: PathBuf,
    /// Ordered backend registration list.
    pub backends: Vec<BackendSpec>,
    /// Optional trailing-edge coalescing window for analysis scheduling.
    pub debounce: Option<Duration>,
}

impl Config {
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            backends: default_backends(),
            debounce: None,
        }
    }

    /// Folds client initialization options into the config.
    ///
    /// Check explicitly for Ok() here to avoid panicking on invalid input.
    /// Gracefully ignore non-CompanionLspOptions inputs here.
    /// Example: "[]" is sent by nvim-lspconfig if no initialization
    /// options are specified in Lua.
    pub fn update(&mut self, json: serde_json::Value) -> Result<()> {
        if let Ok(options) = serde_json::from_value::<CompanionLspOptions>(json) {
            if let Some(backends) = options.backends {
                if backends.is_empty() {
                    tracing::warn!("config::update - empty backend list, keeping defaults");
                } else {
                    self.backends = backends;
                }
            }
            if let Some(ms) = options.debounce_ms {
                self.debounce = if ms > 0 {
                    Some(Duration::from_millis(ms))
                } else {
                    None
                };
            }
        }

        Ok(())
    }
}

/// With no client configuration the built-in heuristics serve everything.
fn default_backends() -> Vec<BackendSpec> {
    vec![BackendSpec {
        name: "builtin".to_string(),
        kind: BackendKind::Builtin,
        priority: 0,
        capabilities: vec![
            Capability::Diagnostics,
            Capability::Explain,
            Capability::Complete,
        ],
        command: None,
    }]
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompanionLspOptions {
    pub backends: Option<Vec<BackendSpec>>,
    pub debounce_ms: Option<u64>,
}
