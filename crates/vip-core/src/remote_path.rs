//! POSIX-style paths on the remote platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// A path on the remote gateway's file system.
///
/// Remote paths are always `/`-separated regardless of the local platform.
/// The stored form is normalized: no repeated separators and no trailing
/// separator (except for the root itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let raw = path.as_ref();
        let absolute = raw.starts_with('/');
        let joined = raw
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/");
        if absolute {
            Self(format!("/{}", joined))
        } else {
            Self(joined)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// Appends a `/`-separated relative segment.
    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        let segment = segment.as_ref().trim_start_matches('/');
        if segment.is_empty() {
            return self.clone();
        }
        if self.0.is_empty() {
            return Self::new(segment);
        }
        Self::new(format!("{}/{}", self.0, segment))
    }

    /// Appends a relative local path, converting its components to `/` form.
    ///
    /// Root, prefix and `..` components are ignored so the result always
    /// stays below `self`.
    pub fn join_local(&self, relative: &Path) -> Self {
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .fold(self.clone(), |acc, part| acc.join(part))
    }

    pub fn parent(&self) -> Option<RemotePath> {
        let idx = self.0.rfind('/')?;
        if self.0 == "/" {
            return None;
        }
        if idx == 0 {
            Some(Self("/".to_string()))
        } else {
            Some(Self(self.0[..idx].to_string()))
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }

    pub fn starts_with(&self, base: &RemotePath) -> bool {
        self.strip_prefix(base).is_some()
    }

    /// Returns the part of `self` below `base`, or `None` when `self` is not
    /// inside `base`. Equal paths yield an empty string.
    pub fn strip_prefix(&self, base: &RemotePath) -> Option<&str> {
        if base.0 == "/" {
            return self.0.strip_prefix('/');
        }
        let rest = self.0.strip_prefix(base.0.as_str())?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix('/')
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemotePath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for RemotePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<RemotePath> for String {
    fn from(value: RemotePath) -> Self {
        value.0
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
