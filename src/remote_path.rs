//! Remote (netdisk-side) path handling.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{PanError, Result};

/// Web UI links carry the directory in a `path=` (or `dir=`) parameter,
/// usually after the `#` fragment.
static WEB_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://pan\.baidu\.com/[^?#]*(?:[?#][^?]*)?\?(?:.*&)?(?:path|dir)=([^&#]+)")
        .expect("Invalid web URL regex")
});

/// Normalize a remote path or a `pan.baidu.com` link to an absolute path.
///
/// Supports the following inputs:
/// - `/apps/demo/file.txt`
/// - `https://pan.baidu.com/disk/main#/index?category=all&path=%2Fapps%2Fdemo`
///
/// # Examples
///
/// ```
/// use baidu_pan::remote_path::normalize;
///
/// assert_eq!(normalize("/apps//demo/").unwrap(), "/apps/demo");
/// assert_eq!(
///     normalize("https://pan.baidu.com/disk/main#/index?category=all&path=%2Fapps%2Fdemo").unwrap(),
///     "/apps/demo"
/// );
/// ```
pub fn normalize(path_or_url: &str) -> Result<String> {
    let trimmed = path_or_url.trim();

    if let Some(captures) = WEB_URL_REGEX.captures(trimmed) {
        if let Some(encoded) = captures.get(1) {
            let decoded = urlencoding::decode(encoded.as_str())
                .map_err(|_| PanError::InvalidPath(path_or_url.to_string()))?;
            return normalize_absolute(&decoded, path_or_url);
        }
    }

    normalize_absolute(trimmed, path_or_url)
}

fn normalize_absolute(path: &str, original: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(PanError::InvalidPath(original.to_string()));
    }

    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PanError::InvalidPath(original.to_string())),
            s => parts.push(s),
        }
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Join a relative path (`/` or `\` separated) onto a remote base.
pub fn join(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = relative.replace('\\', "/");
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }
    format!("{}/{}", base, relative)
}

/// Parent directory of a normalized remote path.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final component of a remote path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Path of `path` below `base`, or `None` when `path` is not inside it.
pub fn relative_to<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    let base = base.trim_end_matches('/');
    let rest = path.strip_prefix(base)?;
    if base.is_empty() {
        return Some(rest.trim_start_matches('/'));
    }
    rest.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_path() {
        assert_eq!(normalize("/apps/demo/a.txt").unwrap(), "/apps/demo/a.txt");
        assert_eq!(normalize("  /apps//demo/./b/ ").unwrap(), "/apps/demo/b");
        assert_eq!(normalize("/").unwrap(), "/");
    }

    #[test]
    fn test_normalize_web_url() {
        let url = "https://pan.baidu.com/disk/main#/index?category=all&path=%2Fapps%2Fdemo%2F%E8%B5%84%E6%BA%90";
        assert_eq!(normalize(url).unwrap(), "/apps/demo/资源");

        let url = "https://pan.baidu.com/disk/home?dir=%2Fbackup";
        assert_eq!(normalize(url).unwrap(), "/backup");
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert!(normalize("relative/path").is_err());
        assert!(normalize("").is_err());
        assert!(normalize("/apps/../etc").is_err());
        assert!(normalize("https://example.com/?path=%2Fx").is_err());
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("/apps/demo/", "sub/a.txt"), "/apps/demo/sub/a.txt");
        assert_eq!(join("/apps/demo", "sub\\b.txt"), "/apps/demo/sub/b.txt");
        assert_eq!(join("/", "a.txt"), "/a.txt");
        assert_eq!(parent("/apps/demo/a.txt"), "/apps/demo");
        assert_eq!(parent("/a.txt"), "/");
        assert_eq!(file_name("/apps/demo/a.txt"), "a.txt");
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/apps/demo/x/y.txt", "/apps/demo"), Some("x/y.txt"));
        assert_eq!(relative_to("/apps/demo/x/y.txt", "/apps/demo/"), Some("x/y.txt"));
        assert_eq!(relative_to("/apps/demox/y.txt", "/apps/demo"), None);
        assert_eq!(relative_to("/a/b", "/"), Some("a/b"));
    }
}
