pub mod backends;
mod capabilities;
pub mod config;
pub mod diagnostics;
mod dispatcher;
pub mod document;
pub mod edits;
pub mod error;
pub mod handlers;
pub mod lsp_ext;
pub mod server;

use crate::config::Config;
use crate::server::ServerState;
use anyhow::Result;
use lsp_server::Connection;
use lsp_types::InitializeParams;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;

pub fn run_server() -> Result<()> {
    tracing::info!("companion-language-server started");

    //Setup IO connections
    tracing::debug!("Setting up stdio connections");
    let (connection, io_threads) = lsp_server::Connection::stdio();

    //wait for client to connection
    tracing::debug!("Waiting for client initialization");
    let (request_id, initialize_params) = connection.initialize_start()?;
    tracing::debug!("Received initialize request: id={}", request_id);

    let initialize_params = match serde_json::from_value::<InitializeParams>(initialize_params) {
        Ok(params) => {
            tracing::debug!("Successfully parsed initialization parameters");
            params
        }
        Err(e) => {
            tracing::error!("Failed to parse initialization parameters: {}", e);
            return Err(e.into());
        }
    };

    if let Some(client_info) = &initialize_params.client_info {
        tracing::info!(
            "Connected to client: '{}' version {}",
            client_info.name,
            client_info.version.as_deref().unwrap_or("unknown")
        );
    } else {
        tracing::warn!("Client did not provide client info");
    }

    let config = {
        let root_path = if let Some(workspace_folders) = &initialize_params.workspace_folders {
            let root = workspace_folders
                .first()
                .and_then(|folder| file_path_from_uri(&folder.uri))
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
            tracing::info!("Using workspace folder as root: {}", root.display());
            root
        } else {
            #[allow(deprecated)]
            let root = match initialize_params
                .root_uri
                .as_ref()
                .and_then(file_path_from_uri)
            {
                Some(it) => it,
                None => std::env::current_dir()?,
            };
            tracing::info!("Using root URI as root: {}", root.display());
            root
        };

        let mut config = Config::new(root_path);
        if let Some(json) = initialize_params.initialization_options {
            tracing::info!("Applying initialization options: {}", json);
            match config.update(json) {
                Ok(()) => tracing::debug!("Configuration updated successfully"),
                Err(e) => {
                    tracing::warn!("Failed to update configuration: {}", e);
                    return Err(e);
                }
            }
        } else {
            tracing::debug!("No initialization options provided, using default config");
        }
        config
    };

    let server_capabilities = capabilities::server_capabilities();
    tracing::debug!("Server capabilities configured");

    let initialize_result = lsp_types::InitializeResult {
        capabilities: server_capabilities,
        server_info: Some(lsp_types::ServerInfo {
            name: String::from("companion-language-server"),
            version: Some(String::from(env!("CARGO_PKG_VERSION"))),
        }),
    };

    let initialize_result = serde_json::to_value(initialize_result)?;

    connection.initialize_finish(request_id, initialize_result)?;
    tracing::info!("Initialization completed successfully");

    tracing::debug!("Starting main loop");
    main_loop(connection, config)?;

    tracing::debug!("Waiting for IO threads to complete");
    io_threads.join()?;
    tracing::info!("Language server stopped");

    Ok(())
}

pub fn main_loop(connection: Connection, config: Config) -> Result<()> {
    tracing::info!("initial config: {:#?}", config);
    ServerState::new(connection.sender, config).run(connection.receiver)
}

pub fn from_json<T: DeserializeOwned>(what: &'static str, json: serde_json::Value) -> Result<T> {
    T::deserialize(&json)
        .map_err(|e| anyhow::anyhow!("could not deserialize {}: {} - {}", what, e, json))
}

pub fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| anyhow::anyhow!("could not serialize to json {}", e))
}

// Good enough for deriving the analyzer working directory; buffers
// themselves are keyed by uri and never touch the filesystem.
fn file_path_from_uri(uri: &lsp_types::Uri) -> Option<PathBuf> {
    let path = uri.as_str().strip_prefix("file://")?;
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}
