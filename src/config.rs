//! Configuration loading from `.env`-style key=value files.
//!
//! Lookup order is `./.env` then `~/.env.baidu`; values found in the first
//! file win. Tokens obtained at runtime are written back to the first file
//! that exists so later runs can reuse them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PanError, Result};
use crate::models::{AppCredentials, Credential, Tokens};

/// Project-local configuration file name.
pub const LOCAL_CONFIG_NAME: &str = ".env";

/// Configuration file name in the user's home directory.
pub const HOME_CONFIG_NAME: &str = ".env.baidu";

pub const CLIENT_ID: &str = "CLIENT_ID";
pub const CLIENT_KEY: &str = "CLIENT_KEY";
pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
pub const REDIRECT_URI: &str = "REDIRECT_URI";
pub const ACCESS_TOKEN: &str = "ACCESS_TOKEN";
pub const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
pub const EXPIRES_AT: &str = "EXPIRES_AT";

/// The four keys an application of its own must provide.
pub const REQUIRED_KEYS: [&str; 4] = [CLIENT_ID, CLIENT_KEY, CLIENT_SECRET, REDIRECT_URI];

const SENSITIVE_KEYS: [&str; 3] = [CLIENT_SECRET, ACCESS_TOKEN, REFRESH_TOKEN];

/// Client id of the shared application whose secret lives on the relay backend.
pub const SHARED_CLIENT_ID: &str = "sTdCOFOkYRXFJgfyzYU76Hwqhw9PlOve";

/// Relay backend that performs code exchange and refresh for the shared app.
pub const SHARED_RELAY_URL: &str = "https://open.xiaocai.site";

/// Redirect URI registered for the shared application.
pub const SHARED_REDIRECT_URI: &str = "https://open.xiaocai.site";

/// Base URLs of the remote services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// OAuth2 server (authorize and token endpoints).
    pub oauth: String,
    /// xpan REST API (listing, metadata, precreate/create).
    pub api: String,
    /// PCS upload host (single upload, locateupload).
    pub pcs: String,
    /// Relay backend used by the shared application.
    pub relay: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            oauth: "https://openapi.baidu.com".to_string(),
            api: "https://pan.baidu.com".to_string(),
            pcs: "https://d.pcs.baidu.com".to_string(),
            relay: SHARED_RELAY_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every service at one base URL (local mocks, self-hosted proxies).
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            oauth: base.clone(),
            api: base.clone(),
            pcs: base.clone(),
            relay: base,
        }
    }

    fn from_values(values: &ConfigValues) -> Self {
        let mut endpoints = Self::default();
        let is_dev = values
            .get("ENV")
            .map(|env| matches!(env.to_lowercase().as_str(), "dev" | "development"))
            .unwrap_or(false);
        let relay_key = if is_dev {
            "BACKEND_OAUTH_URL_DEV"
        } else {
            "BACKEND_OAUTH_URL"
        };
        if let Some(relay) = values.get(relay_key) {
            endpoints.relay = relay.trim_end_matches('/').to_string();
        }
        endpoints
    }
}

#[derive(Debug, Clone)]
enum Line {
    Entry { key: String, value: String },
    Other(String),
}

/// A `KEY=value` file that keeps comments and unknown keys when rewritten.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl EnvFile {
    /// Read a file. A missing file yields an empty store bound to `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self::parse(path, &content))
    }

    /// Read a file, creating it (and its parent directories) when missing.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, "")?;
            debug!(path = %path.display(), "created config file");
        }
        Self::load(path)
    }

    fn parse(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .map(|raw| match parse_entry(raw) {
                Some((key, value)) => Line::Entry { key, value },
                None => Line::Other(raw.to_string()),
            })
            .collect();
        Self { path, lines }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-empty value for `key`. The last assignment wins, as in a shell.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .find_map(|line| match line {
                Line::Entry { key: k, value } if k == key => Some(value.as_str()),
                _ => None,
            })
            .filter(|v| !v.is_empty())
    }

    /// Set `key` in memory, replacing an existing assignment in place.
    pub fn set(&mut self, key: &str, value: &str) {
        let existing = self.lines.iter_mut().rev().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value),
            _ => None,
        });
        match existing {
            Some(slot) => *slot = value.to_string(),
            None => self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Write the file back to disk.
    pub fn save(&self) -> Result<()> {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote_if_needed(value));
                }
                Line::Other(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        fs::write(&self.path, out)?;
        Ok(())
    }

    /// Set several keys and save once.
    pub fn update<'a, I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        for (key, value) in pairs {
            self.set(key, &value);
        }
        self.save()
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, value } => Some((key.as_str(), value.as_str())),
            Line::Other(_) => None,
        })
    }
}

impl fmt::Display for EnvFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvFile({})", self.path.display())?;
        for (key, value) in self.entries() {
            let shown = if SENSITIVE_KEYS.contains(&key) && !value.is_empty() {
                "***"
            } else {
                value
            };
            write!(f, " {}={}", key, shown)?;
        }
        Ok(())
    }
}

fn parse_entry(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return unescape(&value[1..value.len() - 1]);
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    // Unquoted values may carry a trailing comment.
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Undo the escaping applied by [`quote_if_needed`] inside double quotes.
fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

fn quote_if_needed(value: &str) -> String {
    if value.contains(char::is_whitespace) || value.contains(['#', '"', '\'']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Values merged from several files, earlier files taking precedence.
struct ConfigValues {
    layers: Vec<EnvFile>,
}

impl ConfigValues {
    fn get(&self, key: &str) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Result of loading configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub credential: Credential,
    pub endpoints: Endpoints,
    /// File that receives refreshed tokens.
    pub store: EnvFile,
}

/// Locates and parses the configuration file(s).
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
    local_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    allow_shared: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Search the current directory, then the home directory.
    pub fn new() -> Self {
        Self {
            explicit: None,
            local_dir: std::env::current_dir().ok(),
            home_dir: dirs::home_dir(),
            allow_shared: true,
        }
    }

    /// Use exactly this file instead of searching.
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Override the directories searched for `.env` and `.env.baidu`.
    pub fn with_search_dirs(mut self, local_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Self {
        self.local_dir = local_dir;
        self.home_dir = home_dir;
        self
    }

    /// Whether to fall back to the shared application when no own app is configured.
    pub fn allow_shared(mut self, allow: bool) -> Self {
        self.allow_shared = allow;
        self
    }

    pub fn load(&self) -> Result<LoadedConfig> {
        let (layers, store) = self.open_layers()?;
        debug!(store = %store.path().display(), layers = layers.len(), "loaded configuration");
        let values = ConfigValues { layers };

        let credential = Credential {
            app: self.app_credentials(&values)?,
            tokens: read_tokens(&values),
        };

        Ok(LoadedConfig {
            credential,
            endpoints: Endpoints::from_values(&values),
            store,
        })
    }

    fn open_layers(&self) -> Result<(Vec<EnvFile>, EnvFile)> {
        if let Some(path) = &self.explicit {
            let file = EnvFile::open_or_create(path)?;
            return Ok((vec![file.clone()], file));
        }

        let candidates: Vec<PathBuf> = [
            self.local_dir.as_ref().map(|d| d.join(LOCAL_CONFIG_NAME)),
            self.home_dir.as_ref().map(|d| d.join(HOME_CONFIG_NAME)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut layers = Vec::new();
        for path in candidates.iter().filter(|p| p.is_file()) {
            layers.push(EnvFile::load(path)?);
        }

        let store = match layers.first() {
            Some(first) => first.clone(),
            None => {
                let path = candidates.last().ok_or_else(|| {
                    PanError::Config("no directory available for the configuration file".to_string())
                })?;
                EnvFile::open_or_create(path)?
            }
        };
        Ok((layers, store))
    }

    fn app_credentials(&self, values: &ConfigValues) -> Result<AppCredentials> {
        let own_app = values.get(CLIENT_KEY).is_some() || values.get(CLIENT_SECRET).is_some();

        if own_app || !self.allow_shared {
            let missing: Vec<String> = REQUIRED_KEYS
                .iter()
                .filter(|key| values.get(key).is_none())
                .map(|key| key.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(PanError::MissingConfig { missing });
            }
            let require = |key: &str| values.get(key).unwrap_or_default();
            return Ok(AppCredentials::Own {
                client_id: require(CLIENT_ID),
                client_key: require(CLIENT_KEY),
                client_secret: require(CLIENT_SECRET),
                redirect_uri: require(REDIRECT_URI),
            });
        }

        Ok(AppCredentials::Shared {
            client_id: values
                .get(CLIENT_ID)
                .unwrap_or_else(|| SHARED_CLIENT_ID.to_string()),
            redirect_uri: values
                .get(REDIRECT_URI)
                .unwrap_or_else(|| SHARED_REDIRECT_URI.to_string()),
        })
    }
}

fn read_tokens(values: &ConfigValues) -> Option<Tokens> {
    let access_token = values.get(ACCESS_TOKEN)?;
    let refresh_token = values.get(REFRESH_TOKEN)?;
    let expires_at = values
        .get(EXPIRES_AT)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    Some(Tokens {
        access_token,
        refresh_token,
        expires_at,
    })
}
