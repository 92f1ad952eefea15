use crate::config::{BackendKind, Config};
use crate::error::GatewayError;
use anyhow::Result;
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::debug;

pub mod external;
pub mod rule_based;
pub mod types;

pub use external::ExternalCommandBackend;
pub use rule_based::RuleBasedBackend;
pub use types::*;

/// Trait for pluggable explanation/analysis providers.
///
/// Implementations are registered once at startup and called from worker
/// threads, so they must be `Send + Sync` and must not hold per-request
/// state.
pub trait AnalysisBackend: Send + Sync {
    /// Serve one request against the immutable snapshot it carries.
    ///
    /// An `Err` means this backend faulted; the gateway moves on to the
    /// next candidate in the chain.
    fn analyze(&self, request: &AnalysisRequest) -> Result<CapabilityResult>;

    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Whether this backend can currently serve requests. May flip at
    /// runtime (missing executable, lost credentials); probed per request.
    fn is_available(&self) -> bool;
}

/// One registry entry. Priority and capability tags are fixed at
/// registration; only availability is dynamic.
pub struct RegisteredBackend {
    pub name: String,
    pub priority: i32,
    pub capabilities: HashSet<Capability>,
    backend: Box<dyn AnalysisBackend>,
}

/// Ranked fallback chain over the registered backends.
///
/// A request goes to exactly one backend at a time, in descending priority
/// order; registration order breaks ties. Each candidate is tried at most
/// once per request.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<RegisteredBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from the startup configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for spec in &config.backends {
            let backend: Box<dyn AnalysisBackend> = match spec.kind {
                BackendKind::Builtin => Box::new(RuleBasedBackend::new()),
                BackendKind::External => match &spec.command {
                    Some(command) => Box::new(ExternalCommandBackend::new(
                        command,
                        config.root_path.clone(),
                    )),
                    None => {
                        tracing::warn!(
                            "backends::from_config - external backend '{}' has no command, skipped",
                            spec.name
                        );
                        continue;
                    }
                },
            };
            registry.register(
                spec.name.clone(),
                spec.priority,
                spec.capabilities.iter().copied(),
                backend,
            );
        }
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        priority: i32,
        capabilities: impl IntoIterator<Item = Capability>,
        backend: Box<dyn AnalysisBackend>,
    ) {
        let name = name.into();
        debug!("backends::register - '{}' priority {}", name, priority);
        self.backends.push(RegisteredBackend {
            name,
            priority,
            capabilities: capabilities.into_iter().collect(),
            backend,
        });
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Runs the fallback chain for one request.
    ///
    /// Candidates are the registered backends carrying the requested
    /// capability tag whose `is_available()` currently holds. The first
    /// success wins; exhaustion is a real failure, never an empty result.
    pub fn request(&self, request: &AnalysisRequest) -> Result<CapabilityResult, GatewayError> {
        let mut candidates: Vec<&RegisteredBackend> = self
            .backends
            .iter()
            .filter(|entry| entry.capabilities.contains(&request.capability))
            .filter(|entry| entry.backend.is_available())
            .collect();
        // Stable sort: registration order breaks priority ties.
        candidates.sort_by_key(|entry| Reverse(entry.priority));

        for candidate in candidates {
            debug!(
                "backends::request - trying '{}' (priority {}) for {}",
                candidate.name, candidate.priority, request.capability
            );
            match candidate.backend.analyze(request) {
                Ok(result) => {
                    debug!("backends::request - served by '{}'", candidate.name);
                    return Ok(result);
                }
                Err(err) => {
                    // Single-candidate fault, swallowed: the chain moves on.
                    debug!("backends::request - '{}' failed: {:#}", candidate.name, err);
                }
            }
        }

        Err(GatewayError::NoProviderAvailable {
            capability: request.capability,
        })
    }
}
