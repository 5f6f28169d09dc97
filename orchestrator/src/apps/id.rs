//! App identifiers
//!
//! An [`AppId`] is `{namespace}:{relative-path}` where the namespace selects one
//! of the two configured roots. Its transport form is the URL-safe base64 of the
//! printable id, usable as a single path segment.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    User,
    Examples,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::User => "user",
            Namespace::Examples => "examples",
        }
    }
}

impl FromStr for Namespace {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Namespace::User),
            "examples" => Ok(Namespace::Examples),
            other => Err(OrchestratorError::InvalidId(format!(
                "unknown namespace {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId {
    namespace: Namespace,
    /// `/`-separated path relative to the namespace root, never empty and
    /// never containing `.` or `..` segments
    relative: String,
}

impl AppId {
    pub fn new(namespace: Namespace, relative: &str) -> Result<Self> {
        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            return Err(OrchestratorError::InvalidId(
                "empty relative path".to_string(),
            ));
        }
        for segment in relative.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(OrchestratorError::InvalidId(format!(
                    "invalid path segment {:?} in {:?}",
                    segment, relative
                )));
            }
        }
        Ok(Self {
            namespace,
            relative: relative.to_string(),
        })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn is_example(&self) -> bool {
        self.namespace == Namespace::Examples
    }

    pub fn is_app(&self) -> bool {
        self.namespace == Namespace::User
    }

    /// Opaque transport form
    pub fn token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_string())
    }

    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .map_err(|e| OrchestratorError::InvalidId(format!("invalid token: {}", e)))?;
        let printable = String::from_utf8(bytes)
            .map_err(|_| OrchestratorError::InvalidId("token is not valid UTF-8".to_string()))?;
        printable.parse()
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace.as_str(), self.relative)
    }
}

impl FromStr for AppId {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        let (namespace, relative) = s
            .split_once(':')
            .ok_or_else(|| OrchestratorError::InvalidId(format!("{:?} has no namespace", s)))?;
        AppId::new(namespace.parse()?, relative)
    }
}

impl Serialize for AppId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AppId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Maps ids to paths and back for the two configured roots
#[derive(Debug, Clone)]
pub struct AppIdResolver {
    user_root: PathBuf,
    examples_root: PathBuf,
}

impl AppIdResolver {
    pub fn new(user_root: impl AsRef<Path>, examples_root: impl AsRef<Path>) -> Self {
        Self {
            user_root: canonicalize(user_root.as_ref()),
            examples_root: canonicalize(examples_root.as_ref()),
        }
    }

    pub fn root(&self, namespace: Namespace) -> &Path {
        match namespace {
            Namespace::User => &self.user_root,
            Namespace::Examples => &self.examples_root,
        }
    }

    /// Strip the matching root from `path`. Paths under neither root are
    /// rejected, as is a root itself.
    pub fn from_path(&self, path: impl AsRef<Path>) -> Result<AppId> {
        let path = canonicalize(path.as_ref());

        // most specific root first, in case one root is nested in the other
        let mut roots = [
            (Namespace::User, &self.user_root),
            (Namespace::Examples, &self.examples_root),
        ];
        roots.sort_by_key(|(_, root)| std::cmp::Reverse(root.components().count()));

        for (namespace, root) in roots {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let segments = rel
                .components()
                .map(|c| match c {
                    Component::Normal(s) => s.to_str().map(str::to_string),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    OrchestratorError::InvalidId(format!("unsupported path {}", path.display()))
                })?;
            return AppId::new(namespace, &segments.join("/"));
        }

        Err(OrchestratorError::InvalidId(format!(
            "{} is outside the app roots",
            path.display()
        )))
    }

    pub fn to_path(&self, id: &AppId) -> PathBuf {
        id.relative
            .split('/')
            .fold(self.root(id.namespace).to_path_buf(), |acc, s| acc.join(s))
    }

    /// Accept a printable id, an existing path or a transport token
    pub fn resolve(&self, input: &str) -> Result<AppId> {
        if let Some((namespace, _)) = input.split_once(':') {
            if Namespace::from_str(namespace).is_ok() {
                return input.parse();
            }
        }
        let path = Path::new(input);
        if path.is_absolute() || path.exists() {
            return self.from_path(path);
        }
        AppId::from_token(input)
    }
}

/// Resolve symlinks when the path exists, otherwise normalize lexically
fn canonicalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
