//! User-supplied configuration, as read from a config file and CLI flags.
//!
//! Every field is optional; `None` means "use the default". A field that is
//! set replaces the default wholesale (an `alias` table in the file is the
//! whole alias table, not a patch on the defaults).

use super::LibFormat;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;

/// Top-level user configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfig {
    /// Source root, relative to the project directory.
    pub root: Option<String>,
    pub public_dir: Option<PublicDirValue>,
    pub build: UserBuildConfig,
    pub resolve: UserResolveConfig,
    pub server: UserServerConfig,
}

/// `publicDir`: a path, or `false` to disable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PublicDirValue {
    Path(String),
    Enabled(bool),
}

/// `build` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserBuildConfig {
    pub lib: UserLibConfig,
    pub out_dir: Option<String>,
    pub empty_out_dir: Option<bool>,
}

/// `build.lib` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserLibConfig {
    pub entry: Option<String>,
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub formats: Option<Vec<LibFormat>>,
}

/// `resolve` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserResolveConfig {
    pub alias: Option<BTreeMap<String, String>>,
}

/// `server` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub strict_port: Option<bool>,
    pub open: Option<bool>,
    pub cors: Option<bool>,
    pub proxy: Option<ProxyTable>,
}

/// One `server.proxy` value: a bare target or an options object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProxyValue {
    Target(String),
    Options(ProxyOptions),
}

/// Object form of a proxy value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    pub target: String,
    #[serde(default)]
    pub change_origin: Option<bool>,
}

impl ProxyValue {
    /// Target origin string.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Target(t) => t,
            Self::Options(o) => &o.target,
        }
    }

    /// Whether the `Host` header is rewritten.
    #[must_use]
    pub fn change_origin(&self) -> bool {
        match self {
            Self::Target(_) => false,
            Self::Options(o) => o.change_origin.unwrap_or(false),
        }
    }
}

/// `server.proxy` table. Keeps entries in file order, since the first
/// matching prefix wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyTable(pub Vec<(String, ProxyValue)>);

impl<'de> Deserialize<'de> for ProxyTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ProxyTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of path prefix to proxy target")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(1));
                while let Some((prefix, value)) = map.next_entry::<String, ProxyValue>()? {
                    entries.push((prefix, value));
                }
                Ok(ProxyTable(entries))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}
