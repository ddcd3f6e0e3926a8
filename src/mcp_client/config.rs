//! Server configuration persistence.
//!
//! The on-disk document maps server names to launch settings:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "filesystem": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
//!       "env": {},
//!       "enabled": true,
//!       "transport": "stdio"
//!     }
//!   }
//! }
//! ```
//!
//! Files ending in `.yaml`/`.yml` are read and written as YAML. Document
//! order is registry order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::McpError;
use super::types::{ServerConfig, TransportKind};

/// Top-level key holding the server map.
pub const SERVERS_KEY: &str = "mcpServers";

/// Older documents used this key.
const LEGACY_SERVERS_KEY: &str = "servers";

// ─── Document Types ──────────────────────────────────────────────────────────

/// One server entry as it appears on disk (the name is the map key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ServerEntry {
    fn into_config(self, name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: self.command,
            args: self.args,
            env: self.env,
            enabled: self.enabled,
            transport: self.transport,
            url: self.url,
        }
    }
}

impl From<&ServerConfig> for ServerEntry {
    fn from(config: &ServerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            enabled: config.enabled,
            transport: config.transport,
            url: config.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

fn format_for(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            Format::Yaml
        }
        _ => Format::Json,
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Parse a configuration document into server configs, in document order.
///
/// Each entry is parsed on its own: an entry that doesn't parse or doesn't
/// validate is skipped with a warning.
pub fn parse_document(document: Value) -> Result<Vec<ServerConfig>, McpError> {
    let Value::Object(mut root) = document else {
        return Err(McpError::ConfigError {
            reason: "configuration root must be an object".into(),
        });
    };

    let servers = root
        .remove(SERVERS_KEY)
        .or_else(|| root.remove(LEGACY_SERVERS_KEY))
        .ok_or_else(|| McpError::ConfigError {
            reason: format!("missing '{SERVERS_KEY}' object"),
        })?;

    let Value::Object(servers) = servers else {
        return Err(McpError::ConfigError {
            reason: format!("'{SERVERS_KEY}' must be an object"),
        });
    };

    let mut configs = Vec::with_capacity(servers.len());
    for (name, raw) in servers {
        let entry = match serde_json::from_value::<ServerEntry>(raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "skipping malformed server entry");
                continue;
            }
        };
        let config = entry.into_config(&name);
        if let Err(reason) = config.validate() {
            tracing::warn!(server = %name, %reason, "skipping invalid server entry");
            continue;
        }
        configs.push(config);
    }
    Ok(configs)
}

/// Read and parse a configuration file.
pub fn load_file(path: &Path) -> Result<Vec<ServerConfig>, McpError> {
    let content = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let document: Value = match format_for(path) {
        Format::Json => serde_json::from_str(&content).map_err(|e| McpError::ConfigError {
            reason: format!("invalid JSON in {}: {e}", path.display()),
        })?,
        Format::Yaml => serde_yaml::from_str(&content).map_err(|e| McpError::ConfigError {
            reason: format!("invalid YAML in {}: {e}", path.display()),
        })?,
    };

    parse_document(document)
}

// ─── Saving ──────────────────────────────────────────────────────────────────

/// Build the document for a set of configs.
pub fn to_document<'a>(configs: impl IntoIterator<Item = &'a ServerConfig>) -> Value {
    let mut servers = Map::new();
    for config in configs {
        let entry = serde_json::to_value(ServerEntry::from(config)).unwrap_or(Value::Null);
        servers.insert(config.name.clone(), entry);
    }
    let mut root = Map::new();
    root.insert(SERVERS_KEY.to_string(), Value::Object(servers));
    Value::Object(root)
}

/// Write configs to `path`, creating the parent directory if needed.
pub fn save_file<'a>(
    path: &Path,
    configs: impl IntoIterator<Item = &'a ServerConfig>,
) -> Result<(), McpError> {
    let document = to_document(configs);

    let content = match format_for(path) {
        Format::Json => serde_json::to_string_pretty(&document).map_err(|e| e.to_string()),
        Format::Yaml => serde_yaml::to_string(&document).map_err(|e| e.to_string()),
    }
    .map_err(|reason| McpError::ConfigError { reason })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| McpError::ConfigError {
            reason: format!("failed to create {}: {e}", parent.display()),
        })?;
    }

    std::fs::write(path, content).map_err(|e| McpError::ConfigError {
        reason: format!("failed to write {}: {e}", path.display()),
    })
}

/// Platform config location: `<config dir>/mcp-hub/servers.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mcp-hub")
        .join("servers.json")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
