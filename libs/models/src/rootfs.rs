//! RootFS resolution.
//!
//! Work names its root filesystem by URL. Preloaded stacks
//! (`preloaded:<stack>`, `preloaded+oci:<stack>?<query>`) are resolved against
//! the stacks shipped on this cell; every other scheme passes through to the
//! executor untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::{ParseError, Url};

use crate::error::{RootFsError, StackPathMapError};

pub const PRELOADED_ROOTFS_SCHEME: &str = "preloaded";
pub const PRELOADED_OCI_ROOTFS_SCHEME: &str = "preloaded+oci";

/// Preloaded stack name to on-disk rootfs path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackPathMap(BTreeMap<String, String>);

impl StackPathMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `stack:path` entries.
    pub fn parse_entries<I, S>(entries: I) -> Result<Self, StackPathMapError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            let (stack, path) = entry
                .split_once(':')
                .ok_or_else(|| StackPathMapError::InvalidEntry(entry.to_string()))?;

            if stack.trim().is_empty() {
                return Err(StackPathMapError::BlankStack(entry.to_string()));
            }
            if path.trim().is_empty() {
                return Err(StackPathMapError::BlankPath(entry.to_string()));
            }

            map.insert(stack, path);
        }
        Ok(map)
    }

    pub fn insert(&mut self, stack: impl Into<String>, path: impl Into<String>) {
        self.0.insert(stack.into(), path.into());
    }

    pub fn get(&self, stack: &str) -> Option<&str> {
        self.0.get(stack).map(String::as_str)
    }

    pub fn stacks(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StackPathMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Which rootfs URLs a scheme accepts on this cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RootFsProvider {
    /// Any URL with this scheme.
    Arbitrary,
    /// Only the listed preloaded stacks.
    FixedSet { set: BTreeSet<String> },
}

impl RootFsProvider {
    pub fn fixed_set<I, S>(stacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FixedSet {
            set: stacks.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `stack`, as written after the scheme, is served.
    pub fn matches(&self, stack: &str) -> bool {
        match self {
            Self::Arbitrary => true,
            Self::FixedSet { set } => set.contains(stack),
        }
    }
}

/// Scheme to provider, as advertised in the cell state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootFsProviders(BTreeMap<String, RootFsProvider>);

impl RootFsProviders {
    /// Both preloaded schemes serve the stack map; each arbitrary scheme
    /// accepts any URL.
    pub fn new<I, S>(stacks: &StackPathMap, arbitrary_schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut providers = BTreeMap::new();
        for scheme in arbitrary_schemes {
            providers.insert(scheme.into(), RootFsProvider::Arbitrary);
        }

        let preloaded = RootFsProvider::fixed_set(stacks.stacks());
        providers.insert(PRELOADED_OCI_ROOTFS_SCHEME.to_string(), preloaded.clone());
        providers.insert(PRELOADED_ROOTFS_SCHEME.to_string(), preloaded);

        Self(providers)
    }

    pub fn get(&self, scheme: &str) -> Option<&RootFsProvider> {
        self.0.get(scheme)
    }

    /// Whether a rootfs URL string can run on this cell.
    pub fn matches_root_fs(&self, root_fs: &str) -> bool {
        let Ok(url) = Url::parse(root_fs) else {
            return false;
        };
        let (stack, _) = opaque_parts(root_fs);
        self.0
            .get(url.scheme())
            .is_some_and(|provider| provider.matches(stack))
    }
}

/// Resolve a rootfs URL to the path handed to the executor.
///
/// Pure: the result depends only on `root_fs` and `stacks`.
pub fn path_for_root_fs(root_fs: &str, stacks: &StackPathMap) -> Result<String, RootFsError> {
    if root_fs.is_empty() {
        return Ok(String::new());
    }

    check_syntax(root_fs)?;

    let url = match Url::parse(root_fs) {
        Ok(url) => url,
        // A bare reference has no scheme to dispatch on.
        Err(ParseError::RelativeUrlWithoutBase) => return Ok(root_fs.to_string()),
        Err(err) => return Err(malformed(root_fs, err.to_string())),
    };

    let (stack, query) = opaque_parts(root_fs);
    match url.scheme() {
        PRELOADED_ROOTFS_SCHEME => lookup_stack(stack, stacks).map(str::to_string),
        PRELOADED_OCI_ROOTFS_SCHEME => {
            let path = lookup_stack(stack, stacks)?;
            Ok(match query {
                Some(query) => format!("{PRELOADED_OCI_ROOTFS_SCHEME}:{path}?{query}"),
                None => format!("{PRELOADED_OCI_ROOTFS_SCHEME}:{path}"),
            })
        }
        _ => Ok(root_fs.to_string()),
    }
}

/// Stack and query of `scheme:stack?query#fragment`, exactly as written.
///
/// `Url` percent-encodes both, so they are cut from the raw input instead.
fn opaque_parts(root_fs: &str) -> (&str, Option<&str>) {
    let rest = root_fs.split_once(':').map_or("", |(_, rest)| rest);
    let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
    match rest.split_once('?') {
        Some((stack, query)) => (stack, Some(query)),
        None => (rest, None),
    }
}

fn lookup_stack<'a>(stack: &str, stacks: &'a StackPathMap) -> Result<&'a str, RootFsError> {
    stacks
        .get(stack)
        .ok_or_else(|| RootFsError::PreloadedNotFound {
            stack: stack.to_string(),
        })
}

/// Reject control characters and `%` not followed by two hex digits.
fn check_syntax(root_fs: &str) -> Result<(), RootFsError> {
    if root_fs.chars().any(|c| c.is_ascii_control()) {
        return Err(malformed(root_fs, "invalid control character"));
    }

    let bytes = root_fs.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'%' {
            continue;
        }
        let escape = bytes.get(i + 1..i + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(malformed(root_fs, "invalid percent escape"));
        }
    }

    Ok(())
}

fn malformed(root_fs: &str, reason: impl Into<String>) -> RootFsError {
    RootFsError::Malformed {
        url: root_fs.to_string(),
        reason: reason.into(),
    }
}
