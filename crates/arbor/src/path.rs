//! Actor paths.
//!
//! Local paths are absolute, slash separated and always end in `/` (the root is
//! `/`). Remote paths look like `arbor://host:port/system-name/user/worker/`.

use crate::error::RuntimeError;
use url::Url;

pub const SCHEME: &str = "arbor";

pub(crate) fn is_remote(path: &str) -> bool {
    path.contains("://")
}

/// Appends the trailing `/` if it is missing.
pub(crate) fn normalize(path: &str) -> String {
    let path = path.trim();
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

pub(crate) fn child_path(parent: &str, name: &str) -> String {
    format!("{parent}{name}/")
}

/// `"/user/a/b/"` -> `"/user/a/"`. The root has no parent.
pub(crate) fn parent_of(path: &str) -> Option<String> {
    let trimmed = path.strip_suffix('/')?;
    if trimmed.is_empty() {
        return None;
    }
    let cut = trimmed.rfind('/')?;
    Some(trimmed[..=cut].to_string())
}

pub(crate) fn name_of(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}

/// Turns a path as written by user code into an absolute, normalized path.
///
/// `/x` is absolute, `./x` and bare `x` are relative to `base`, and each leading
/// `../` climbs one level from `base`. Remote paths are returned unchanged.
pub(crate) fn absolutize(base: &str, path: &str) -> Result<String, RuntimeError> {
    let path = path.trim();
    if is_remote(path) {
        return Ok(path.to_string());
    }
    if path.starts_with('/') {
        return Ok(normalize(path));
    }

    let mut rest = path;
    let mut anchor = base.to_string();
    loop {
        if let Some(r) = rest.strip_prefix("../") {
            rest = r;
        } else if rest == ".." {
            rest = "";
        } else {
            break;
        }
        anchor = parent_of(&anchor).ok_or_else(|| RuntimeError::InvalidPath(path.to_string()))?;
    }
    let rest = rest.strip_prefix("./").unwrap_or(rest);
    if rest.is_empty() || rest == "." {
        Ok(anchor)
    } else {
        Ok(normalize(&format!("{anchor}{rest}")))
    }
}

/// The pieces of a remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    pub host: String,
    pub port: u16,
    pub system: String,
    /// The path inside the remote system, e.g. `/user/worker/`.
    pub path: String,
}

impl RemoteAddress {
    pub fn parse(path: &str) -> Result<Self, RuntimeError> {
        let invalid = || RuntimeError::InvalidPath(path.to_string());
        let url = Url::parse(path).map_err(|_| invalid())?;
        let host = url.host_str().ok_or_else(invalid)?.to_string();
        let port = url.port().ok_or_else(invalid)?;
        let mut parts = segments(url.path()).into_iter();
        let system = parts.next().ok_or_else(invalid)?;
        let rest: Vec<String> = parts.collect();
        let path = if rest.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", rest.join("/"))
        };
        Ok(RemoteAddress {
            host,
            port,
            system,
            path,
        })
    }

    /// Key of the connection pool serving this address.
    pub fn host_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn to_path(&self) -> String {
        format!(
            "{SCHEME}://{}:{}/{}{}",
            self.host, self.port, self.system, self.path
        )
    }
}
