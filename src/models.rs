//! Data models for credentials and Baidu Netdisk API responses.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{PanError, Result};

/// Application identity used for OAuth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCredentials {
    /// An application registered by the user; OAuth talks to Baidu directly.
    Own {
        client_id: String,
        client_key: String,
        client_secret: String,
        redirect_uri: String,
    },
    /// The shared application; code exchange and refresh go through the relay.
    Shared {
        client_id: String,
        redirect_uri: String,
    },
}

impl AppCredentials {
    pub fn client_id(&self) -> &str {
        match self {
            AppCredentials::Own { client_id, .. } | AppCredentials::Shared { client_id, .. } => {
                client_id
            }
        }
    }

    pub fn redirect_uri(&self) -> &str {
        match self {
            AppCredentials::Own { redirect_uri, .. }
            | AppCredentials::Shared { redirect_uri, .. } => redirect_uri,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, AppCredentials::Shared { .. })
    }
}

/// Access/refresh token pair with its absolute expiry (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
}

/// Everything needed to authenticate: the app identity plus any stored tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub app: AppCredentials,
    pub tokens: Option<Tokens>,
}

/// Longest token lifetime accepted from the server (20 years).
const MAX_EXPIRES_IN: u64 = 20 * 365 * 24 * 3600;

/// OAuth2 token response.
///
/// The relay backend wraps the fields in a `data` object and sometimes sends
/// `expires_in` as a string, so this is decoded from a loose JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

impl TokenResponse {
    pub fn from_value(value: &Value) -> std::result::Result<Self, String> {
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let description = value
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(format!("{}: {}", error, description));
        }

        let text = |key: &str| {
            token_field(value, key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let access_token = text("access_token");
        let refresh_token = text("refresh_token");
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err("response is missing access_token or refresh_token".to_string());
        }

        let expires_in = match token_field(value, "expires_in") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| "response is missing a valid expires_in".to_string())?;

        if !(0.0..MAX_EXPIRES_IN as f64).contains(&expires_in) {
            return Err(format!("expires_in out of range: {}", expires_in));
        }

        Ok(Self {
            access_token,
            refresh_token,
            expires_in: expires_in as u64,
        })
    }
}

fn token_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| value.get("data").and_then(|d| d.get(key)))
}

/// Baidu's numeric flags arrive as 0/1 integers.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => s == "1",
        _ => false,
    })
}

/// Account information from `xpan/nas?method=uinfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub baidu_name: String,
    #[serde(default)]
    pub netdisk_name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub vip_type: i64,
    #[serde(default)]
    pub uk: u64,
}

/// Membership tier, which decides the upload slice size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VipTier {
    Normal,
    Vip,
    Svip,
}

impl VipTier {
    pub fn from_vip_type(vip_type: i64) -> Self {
        match vip_type {
            1 => VipTier::Vip,
            2 => VipTier::Svip,
            _ => VipTier::Normal,
        }
    }

    /// Slice size accepted by the upload servers for this tier.
    pub fn slice_size(self) -> u64 {
        const MIB: u64 = 1024 * 1024;
        match self {
            VipTier::Normal => 4 * MIB,
            VipTier::Vip => 16 * MIB,
            VipTier::Svip => 32 * MIB,
        }
    }
}

impl UserInfo {
    pub fn tier(&self) -> VipTier {
        VipTier::from_vip_type(self.vip_type)
    }
}

/// Storage quota from `/api/quota`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub free: u64,
    #[serde(default)]
    pub expire: bool,
}

impl std::fmt::Display for Quota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} used of {} ({} free)",
            format_size(self.used),
            format_size(self.total),
            format_size(self.total.saturating_sub(self.used))
        )
    }
}

/// A file or directory as returned by the listing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub fs_id: u64,
    pub path: String,
    #[serde(default)]
    pub server_filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub isdir: bool,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub server_mtime: u64,
}

impl std::fmt::Display for RemoteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size_str = if self.isdir {
            "-".to_string()
        } else {
            format_size(self.size)
        };
        let kind = if self.isdir { "dir" } else { "file" };
        write!(f, "{:<20} {:>10} {:<4} {}", self.fs_id, size_str, kind, self.path)
    }
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Page from `xpan/file?method=list`.
#[derive(Debug, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub list: Vec<RemoteEntry>,
}

/// Page from `xpan/multimedia?method=listall`.
#[derive(Debug, Deserialize)]
pub struct ListAllResponse {
    #[serde(default)]
    pub list: Vec<RemoteEntry>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub has_more: bool,
    #[serde(default)]
    pub cursor: u64,
}

/// Item from `xpan/multimedia?method=filemetas`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileMeta {
    pub fs_id: u64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub dlink: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileMetasResponse {
    #[serde(default)]
    pub list: Vec<FileMeta>,
}

/// Response from `xpan/file?method=precreate`.
#[derive(Debug, Deserialize)]
pub struct PrecreateResponse {
    #[serde(default)]
    pub uploadid: String,
    /// 1: slices must be uploaded; 2: the server already has the content.
    #[serde(default)]
    pub return_type: i64,
    /// Indices of the slices the server still needs.
    #[serde(default)]
    pub block_list: Vec<usize>,
    #[serde(default)]
    pub info: Option<CreatedFile>,
}

#[derive(Debug, Deserialize)]
pub struct UploadServer {
    pub server: String,
}

/// Response from `pcs/file?method=locateupload`.
#[derive(Debug, Deserialize)]
pub struct LocateUploadResponse {
    #[serde(default)]
    pub servers: Vec<UploadServer>,
}

impl LocateUploadResponse {
    /// First https server, or the first server of any scheme.
    pub fn pick_server(&self) -> Option<&str> {
        self.servers
            .iter()
            .find(|s| s.server.starts_with("https://"))
            .or_else(|| self.servers.first())
            .map(|s| s.server.trim_end_matches('/'))
    }
}

/// Response from `pcs/superfile2?method=upload`.
#[derive(Debug, Deserialize)]
pub struct SlicePartResponse {
    #[serde(default)]
    pub md5: String,
}

/// A file that exists remotely after an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedFile {
    #[serde(default)]
    pub fs_id: u64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub md5: Option<String>,
}

/// Page from `xpan/file?method=search`.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub list: Vec<RemoteEntry>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub has_more: bool,
}

/// Page from the `doclist`/`imagelist`/`videolist`/`btlist` methods.
#[derive(Debug, Deserialize)]
pub struct MediaListResponse {
    #[serde(default)]
    pub info: Vec<RemoteEntry>,
}

/// File type buckets used by search and the category endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Video = 1,
    Audio = 2,
    Image = 3,
    Document = 4,
    Application = 5,
    Other = 6,
    Torrent = 7,
}

impl Category {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Method of the dedicated listing endpoint, where one exists.
    pub fn list_method(self) -> Option<&'static str> {
        match self {
            Category::Document => Some("doclist"),
            Category::Image => Some("imagelist"),
            Category::Video => Some("videolist"),
            Category::Torrent => Some("btlist"),
            _ => None,
        }
    }
}

/// Totals for one category from `/api/categoryinfo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryCount {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub total: u64,
}

/// Response from `/api/categoryinfo`, keyed by category code.
#[derive(Debug, Deserialize)]
pub struct CategoryInfoResponse {
    #[serde(default)]
    pub info: std::collections::HashMap<String, CategoryCount>,
}

/// Result for one item of a `filemanager` batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManagerResult {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub errno: i64,
}

#[derive(Debug, Deserialize)]
pub struct FileManagerResponse {
    #[serde(default)]
    pub info: Vec<FileManagerResult>,
}

/// Check the provider's error envelope.
///
/// xpan endpoints report failures through `errno`/`errmsg`, pcs endpoints
/// through `error_code`/`error_msg`; both may arrive with HTTP 200.
pub fn check_envelope(value: &Value) -> Result<()> {
    let code = value
        .get("errno")
        .or_else(|| value.get("error_code"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if code == 0 {
        return Ok(());
    }
    let message = value
        .get("errmsg")
        .or_else(|| value.get("error_msg"))
        .or_else(|| value.get("show_msg"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(error_for_code(code, message))
}

/// Map a provider error code to the matching error kind.
pub fn error_for_code(code: i64, message: String) -> PanError {
    match code {
        -9 | 31066 => PanError::NotFound(message),
        _ => PanError::RemoteApi { code, message },
    }
}
