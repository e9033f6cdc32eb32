use bitcoincore_rpc::Auth;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcAuth {
    None,
    UserPass(String, String),
    CookieFile(PathBuf),
}

fn default_rpc_url() -> String {
    format!(
        "http://127.0.0.1:{}",
        crate::constants::SCASH_NODE_DEFAULT_RPC_PORT
    )
}

/// Connection settings for the SCASH node json-rpc endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRpcConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default)]
    pub auth: Option<RpcAuth>,
}

impl ChainRpcConfig {
    pub fn rpc_url(&self) -> String {
        self.rpc_url.clone()
    }

    pub fn auth(&self) -> Auth {
        match &self.auth {
            Some(RpcAuth::UserPass(user, pass)) => Auth::UserPass(user.clone(), pass.clone()),
            Some(RpcAuth::CookieFile(path)) => Auth::CookieFile(path.clone()),
            Some(RpcAuth::None) | None => Auth::None,
        }
    }

    // Apply the RPC_HOST / RPC_PORT / RPC_USER / RPC_PASSWORD overrides, the same
    // variables the node deployment scripts export
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("RPC_HOST");
        let port = lookup("RPC_PORT");
        if host.is_some() || port.is_some() {
            // Whichever part is not overridden comes from the configured url
            let mut url = RpcUrlParts::parse(&self.rpc_url);
            if let Some(host) = host {
                url.host = host;
            }
            if let Some(port) = port {
                url.port = Some(port);
            }
            self.rpc_url = url.to_string();
        }

        if let Some(user) = lookup("RPC_USER") {
            let pass = lookup("RPC_PASSWORD").unwrap_or_default();
            self.auth = Some(RpcAuth::UserPass(user, pass));
        }
    }
}

// scheme://host[:port][/path] split of an rpc url
#[derive(Debug, Clone, PartialEq, Eq)]
struct RpcUrlParts {
    scheme: String,
    host: String,
    port: Option<String>,
    path: String,
}

impl RpcUrlParts {
    fn parse(url: &str) -> Self {
        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("http".to_string(), url),
        };

        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], rest[pos..].to_string()),
            None => (rest, String::new()),
        };

        // Bracketed ipv6 hosts keep their colons
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !port.contains(']') => {
                (host.to_string(), Some(port.to_string()))
            }
            _ => (authority.to_string(), None),
        };

        Self {
            scheme,
            host,
            port,
            path,
        }
    }
}

impl std::fmt::Display for RpcUrlParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = &self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path)
    }
}

impl Default for ChainRpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            auth: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_rpc_config_overrides() {
        let mut config = ChainRpcConfig::default();
        assert_eq!(config.rpc_url(), "http://127.0.0.1:8342");
        assert!(matches!(config.auth(), Auth::None));

        let vars: HashMap<&str, &str> = [
            ("RPC_HOST", "10.0.0.2"),
            ("RPC_PORT", "18443"),
            ("RPC_USER", "alice"),
            ("RPC_PASSWORD", "secret"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.rpc_url(), "http://10.0.0.2:18443");
        assert_eq!(
            config.auth,
            Some(RpcAuth::UserPass("alice".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_single_override_keeps_configured_part() {
        let mut config = ChainRpcConfig {
            rpc_url: "http://192.168.1.5:8342".to_string(),
            auth: None,
        };
        config.apply_overrides(|k| (k == "RPC_PORT").then(|| "18443".to_string()));
        assert_eq!(config.rpc_url(), "http://192.168.1.5:18443");

        let mut config = ChainRpcConfig {
            rpc_url: "https://node.local:9000/wallet".to_string(),
            auth: None,
        };
        config.apply_overrides(|k| (k == "RPC_HOST").then(|| "10.0.0.9".to_string()));
        assert_eq!(config.rpc_url(), "https://10.0.0.9:9000/wallet");

        // No port configured and none given
        let mut config = ChainRpcConfig {
            rpc_url: "http://[::1]".to_string(),
            auth: None,
        };
        config.apply_overrides(|k| (k == "RPC_HOST").then(|| "node.local".to_string()));
        assert_eq!(config.rpc_url(), "http://node.local");
    }

    #[test]
    fn test_rpc_config_no_overrides() {
        let mut config = ChainRpcConfig::default();
        config.apply_overrides(|_| None);
        assert_eq!(config, ChainRpcConfig::default());
    }
}
