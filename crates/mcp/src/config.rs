//! Where a tool-provider server lives and how to reach it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How to reach a tool-provider server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    /// Child process speaking the protocol on stdin/stdout.
    #[serde(rename = "stdio", alias = "subprocess")]
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Streamable HTTP endpoint.
    #[serde(rename = "http", alias = "httpStream")]
    HttpStream { url: String },
}

impl TransportConfig {
    /// Short kind label (`stdio` or `http`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subprocess { .. } => "stdio",
            Self::HttpStream { .. } => "http",
        }
    }
}

/// Configuration for one tool-provider server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transport_config_accepts_both_type_spellings() {
        let stdio: TransportConfig = serde_json::from_value(json!({
            "type": "subprocess", "command": "node", "args": ["server.js"]
        }))
        .unwrap();
        assert_eq!(stdio.kind(), "stdio");

        let http: TransportConfig =
            serde_json::from_value(json!({"type": "httpStream", "url": "http://localhost:3001/mcp"}))
                .unwrap();
        assert_eq!(http, TransportConfig::HttpStream {
            url: "http://localhost:3001/mcp".into()
        });
    }

    #[test]
    fn server_config_flattens_transport() {
        let config: ServerConfig = serde_json::from_value(json!({
            "name": "weather",
            "type": "stdio",
            "command": "weather-mcp",
            "env": {"UNITS": "metric"}
        }))
        .unwrap();
        assert_eq!(config.name, "weather");
        let TransportConfig::Subprocess { command, args, env } = config.transport else {
            panic!("expected stdio transport");
        };
        assert_eq!(command, "weather-mcp");
        assert!(args.is_empty());
        assert_eq!(env.get("UNITS").map(String::as_str), Some("metric"));
    }
}
