use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

/// One line of the proxy pool file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parses `host:port` or `host:port:user:pass`.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split(':').collect();
        let (host, port, username, password) = match parts.as_slice() {
            [host, port] => (*host, *port, None, None),
            [host, port, user, pass] => (*host, *port, Some(*user), Some(*pass)),
            _ => return None,
        };
        if host.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok()?;
        Some(Self {
            host: host.to_string(),
            port,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        })
    }

    /// `http://[user:pass@]host:port`, percent-encoding the credentials.
    pub fn url(&self) -> Option<String> {
        let mut url = Url::parse(&format!("http://{}:{}", self.host, self.port)).ok()?;
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            url.set_username(user).ok()?;
            url.set_password(Some(pass)).ok()?;
        }
        Some(url.as_str().trim_end_matches('/').to_string())
    }
}

pub struct ProxyManager;

impl ProxyManager {
    /// Loads proxies from the pool file. Missing file means an empty pool.
    pub fn load_proxies(path: impl AsRef<Path>) -> Result<Vec<ProxyEndpoint>> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found. Running without proxies.", path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let proxies = Self::parse_pool(&content);

        info!("Loaded {} proxies from {}", proxies.len(), path.display());
        Ok(proxies)
    }

    pub fn parse_pool(content: &str) -> Vec<ProxyEndpoint> {
        let mut proxies = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match ProxyEndpoint::parse(line) {
                Some(proxy) => proxies.push(proxy),
                None => warn!("Skipping invalid proxy line: {}", line),
            }
        }
        proxies
    }

    /// Normalized URLs of every loadable proxy in the file.
    pub fn load_urls(path: impl AsRef<Path>) -> Result<Vec<String>> {
        Ok(Self::load_proxies(path)?
            .iter()
            .filter_map(ProxyEndpoint::url)
            .collect())
    }
}
