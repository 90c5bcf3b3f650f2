//! Where a resource's calendar file lives.

use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

const REMOTE_SCHEMES: [&str; 4] = ["http", "https", "webdav", "webdavs"];

/// A calendar file location: a local path or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(Url),
}

impl Location {
    /// Parse a configured location.
    ///
    /// Accepts absolute paths (with `~` expansion), `file://` URLs and
    /// remote URLs with a supported scheme. Anything else is malformed.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        if s.contains("://") {
            let url = Url::parse(s).ok()?;
            return match url.scheme() {
                "file" => url.to_file_path().ok().map(Location::Local),
                scheme if REMOTE_SCHEMES.contains(&scheme) && url.has_host() => {
                    Some(Location::Remote(url))
                }
                _ => None,
            };
        }

        let expanded = PathBuf::from(shellexpand::tilde(s).into_owned());
        expanded.is_absolute().then_some(Location::Local(expanded))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Location::Local(path) => Some(path),
            Location::Remote(_) => None,
        }
    }

    /// Location in display-friendly form, without any credentials.
    pub fn display_location(&self) -> String {
        match self {
            Location::Local(path) => path.display().to_string(),
            Location::Remote(url) => {
                let mut url = url.clone();
                let _ = url.set_password(None);
                let _ = url.set_username("");
                url.to_string()
            }
        }
    }

    /// Key used to detect two resources configured with the same file.
    pub fn identity(&self) -> String {
        match self {
            Location::Local(path) => std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
            Location::Remote(url) => url.as_str().trim_end_matches('/').to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.display_location())
    }
}
