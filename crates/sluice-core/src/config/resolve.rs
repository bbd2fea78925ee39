//! Folding defaults, user config and mode into a [`ResolvedConfig`].

use super::{
    absolutize, BuildConfiguration, ConfigError, DevServerConfiguration, LibConfig, LibFormat,
    ProxyRule, PublicDirValue, ResolvedConfig, UserConfig, DEFAULT_ALIASES, DEFAULT_ENTRY,
    DEFAULT_HOST, DEFAULT_LIB_NAME, DEFAULT_OUT_DIR, DEFAULT_PORT, DEFAULT_PROXY,
    DEFAULT_PUBLIC_DIR, DEFAULT_ROOT,
};
use crate::mode::BuildMode;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Resolve the configuration for `mode` with no user config.
pub fn resolve_defaults(mode: BuildMode, project_dir: &Path) -> Result<ResolvedConfig, ConfigError> {
    resolve(mode, &UserConfig::default(), project_dir)
}

/// Build the resolved configuration for one invocation.
///
/// Pure: the same inputs always give an equal result, and nothing on disk is
/// touched. `minify` and `sourcemap` are both exactly `mode.is_production()`.
pub fn resolve(
    mode: BuildMode,
    user: &UserConfig,
    project_dir: &Path,
) -> Result<ResolvedConfig, ConfigError> {
    let root = absolutize(
        project_dir,
        Path::new(user.root.as_deref().unwrap_or(DEFAULT_ROOT)),
    );

    let build = resolve_build(mode, user, &root)?;
    let server = resolve_server(user, &root)?;

    Ok(ResolvedConfig {
        mode,
        project_dir: project_dir.to_path_buf(),
        build,
        server,
    })
}

fn resolve_build(
    mode: BuildMode,
    user: &UserConfig,
    root: &Path,
) -> Result<BuildConfiguration, ConfigError> {
    let lib = &user.build.lib;

    let entry = lib.entry.as_deref().unwrap_or(DEFAULT_ENTRY);
    if entry.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "build.lib.entry",
            message: "must not be empty".to_string(),
        });
    }

    let name = lib.name.clone().unwrap_or_else(|| DEFAULT_LIB_NAME.to_string());
    if !is_lib_name(&name) {
        return Err(ConfigError::InvalidLibName { name });
    }

    let file_name = lib.file_name.clone().unwrap_or_else(|| name.clone());
    if file_name.is_empty() || file_name.contains(['/', '\\']) {
        return Err(ConfigError::InvalidValue {
            key: "build.lib.fileName",
            message: format!("'{file_name}' must be a plain file name"),
        });
    }

    let formats = match &lib.formats {
        Some(formats) if formats.is_empty() => {
            return Err(ConfigError::InvalidValue {
                key: "build.lib.formats",
                message: "at least one format is required".to_string(),
            });
        }
        Some(formats) => dedup_formats(formats),
        None => vec![LibFormat::Es, LibFormat::Umd],
    };

    let out_dir = absolutize(
        root,
        Path::new(user.build.out_dir.as_deref().unwrap_or(DEFAULT_OUT_DIR)),
    );

    let alias = match &user.resolve.alias {
        Some(table) => table.clone(),
        None => DEFAULT_ALIASES
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<BTreeMap<_, _>>(),
    };
    if let Some(key) = alias.keys().find(|k| k.is_empty()) {
        return Err(ConfigError::InvalidValue {
            key: "resolve.alias",
            message: format!("empty alias key '{key}'"),
        });
    }

    Ok(BuildConfiguration {
        root: root.to_path_buf(),
        entry: PathBuf::from(entry),
        lib: LibConfig {
            name,
            file_name,
            formats,
        },
        out_dir,
        minify: mode.is_production(),
        sourcemap: mode.is_production(),
        alias,
        empty_out_dir: user.build.empty_out_dir.unwrap_or(true),
    })
}

fn resolve_server(user: &UserConfig, root: &Path) -> Result<DevServerConfiguration, ConfigError> {
    let server = &user.server;

    let host = server.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string());
    if host.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "server.host",
            message: "must not be empty".to_string(),
        });
    }

    let proxy = match &server.proxy {
        Some(table) => table
            .0
            .iter()
            .map(|(prefix, value)| proxy_rule(prefix, value.target(), value.change_origin()))
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![proxy_rule(DEFAULT_PROXY.0, DEFAULT_PROXY.1, false)?],
    };

    let public_dir = match &user.public_dir {
        None => Some(root.join(DEFAULT_PUBLIC_DIR)),
        Some(PublicDirValue::Enabled(false)) => None,
        Some(PublicDirValue::Enabled(true)) => Some(root.join(DEFAULT_PUBLIC_DIR)),
        Some(PublicDirValue::Path(p)) => Some(absolutize(root, Path::new(p))),
    };

    Ok(DevServerConfiguration {
        host,
        port: server.port.unwrap_or(DEFAULT_PORT),
        strict_port: server.strict_port.unwrap_or(true),
        open: server.open.unwrap_or(false),
        cors: server.cors.unwrap_or(true),
        proxy,
        public_dir,
    })
}

fn proxy_rule(prefix: &str, target: &str, change_origin: bool) -> Result<ProxyRule, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidProxy {
        prefix: prefix.to_string(),
        message,
    };

    if !prefix.starts_with('/') {
        return Err(invalid("prefix must start with '/'".to_string()));
    }

    let url = Url::parse(target).map_err(|e| invalid(format!("target '{target}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "target '{target}' must be an http or https URL"
        )));
    }
    if url.host_str().is_none() {
        return Err(invalid(format!("target '{target}' has no host")));
    }

    Ok(ProxyRule {
        prefix: prefix.to_string(),
        target: url,
        change_origin,
    })
}

fn dedup_formats(formats: &[LibFormat]) -> Vec<LibFormat> {
    let mut out: Vec<LibFormat> = Vec::with_capacity(formats.len());
    for f in formats {
        if !out.contains(f) {
            out.push(*f);
        }
    }
    out
}

/// An ASCII JavaScript identifier, usable as a global variable name.
fn is_lib_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyTable, ProxyValue};

    fn project() -> PathBuf {
        PathBuf::from("/work/app")
    }

    #[test]
    fn test_defaults_development() {
        let cfg = resolve_defaults(BuildMode::Development, &project()).unwrap();
        assert_eq!(cfg.build.root, PathBuf::from("/work/app/internal/ts-client"));
        assert_eq!(cfg.build.entry, PathBuf::from("client.ts"));
        assert_eq!(
            cfg.build.entry_path(),
            PathBuf::from("/work/app/internal/ts-client/client.ts")
        );
        assert_eq!(cfg.build.out_dir, PathBuf::from("/work/app/internal/static/build"));
        assert_eq!(cfg.build.lib.name, "client");
        assert_eq!(cfg.build.lib.file_name, "client");
        assert_eq!(cfg.build.lib.formats, vec![LibFormat::Es, LibFormat::Umd]);
        assert!(!cfg.build.minify);
        assert!(!cfg.build.sourcemap);
        assert!(cfg.build.empty_out_dir);
        assert_eq!(cfg.build.alias.get("htmx").map(String::as_str), Some("htmx.org"));

        assert_eq!(cfg.server.host, "localhost");
        assert_eq!(cfg.server.port, 8081);
        assert!(cfg.server.strict_port);
        assert!(!cfg.server.open);
        assert_eq!(cfg.server.proxy.len(), 1);
        assert_eq!(cfg.server.proxy[0].prefix, "/api");
        assert_eq!(cfg.server.proxy[0].target.as_str(), "http://localhost:8080/");
        assert_eq!(
            cfg.server.public_dir,
            Some(PathBuf::from("/work/app/internal/ts-client/public"))
        );
    }

    #[test]
    fn test_production_minifies_with_sourcemaps() {
        let cfg = resolve_defaults(BuildMode::Production, &project()).unwrap();
        assert!(cfg.build.minify);
        assert!(cfg.build.sourcemap);
        assert_eq!(cfg.mode, BuildMode::Production);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let a = resolve_defaults(BuildMode::Production, &project()).unwrap();
        let b = resolve_defaults(BuildMode::Production, &project()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_user_overrides() {
        let mut user = UserConfig::default();
        user.root = Some("web".into());
        user.build.lib.entry = Some("src/main.ts".into());
        user.build.lib.name = Some("App".into());
        user.build.out_dir = Some("/abs/out".into());
        user.build.empty_out_dir = Some(false);
        user.build.lib.formats = Some(vec![LibFormat::Iife, LibFormat::Iife, LibFormat::Es]);
        user.server.port = Some(3000);
        user.server.strict_port = Some(false);
        user.public_dir = Some(PublicDirValue::Enabled(false));
        user.server.proxy = Some(ProxyTable(vec![
            ("/v2".into(), ProxyValue::Target("http://127.0.0.1:9000/base".into())),
            ("/v".into(), ProxyValue::Target("https://example.com".into())),
        ]));

        let cfg = resolve(BuildMode::Development, &user, &project()).unwrap();
        assert_eq!(cfg.build.root, PathBuf::from("/work/app/web"));
        assert_eq!(cfg.build.lib.name, "App");
        assert_eq!(cfg.build.lib.file_name, "App");
        assert_eq!(cfg.build.lib.formats, vec![LibFormat::Iife, LibFormat::Es]);
        assert_eq!(cfg.build.out_dir, PathBuf::from("/abs/out"));
        assert!(!cfg.build.empty_out_dir);
        assert_eq!(cfg.server.port, 3000);
        assert!(!cfg.server.strict_port);
        assert_eq!(cfg.server.public_dir, None);
        let prefixes: Vec<_> = cfg.server.proxy.iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, ["/v2", "/v"]);
    }

    #[test]
    fn test_invalid_proxy_prefix() {
        let mut user = UserConfig::default();
        user.server.proxy = Some(ProxyTable(vec![(
            "api".into(),
            ProxyValue::Target("http://localhost:8080".into()),
        )]));
        let err = resolve(BuildMode::Development, &user, &project()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID_PROXY");
    }

    #[test]
    fn test_invalid_proxy_target() {
        for target in ["localhost:8080", "ftp://host", "not a url"] {
            let mut user = UserConfig::default();
            user.server.proxy = Some(ProxyTable(vec![(
                "/api".into(),
                ProxyValue::Target(target.into()),
            )]));
            let err = resolve(BuildMode::Development, &user, &project()).unwrap_err();
            assert_eq!(err.code(), "CONFIG_INVALID_PROXY", "target {target}");
        }
    }

    #[test]
    fn test_invalid_lib_name() {
        let mut user = UserConfig::default();
        user.build.lib.name = Some("my-lib".into());
        let err = resolve(BuildMode::Production, &user, &project()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLibName { ref name } if name == "my-lib"));
    }

    #[test]
    fn test_lib_name_characters() {
        for name in ["client", "_x", "$", "Lib2", "a_b$c"] {
            assert!(is_lib_name(name), "{name}");
        }
        for name in ["", "2lib", "my-lib", "a.b", "a b", "caf\u{e9}"] {
            assert!(!is_lib_name(name), "{name}");
        }
    }

    #[test]
    fn test_empty_formats_rejected() {
        let mut user = UserConfig::default();
        user.build.lib.formats = Some(vec![]);
        let err = resolve(BuildMode::Production, &user, &project()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID_VALUE");
    }

    #[test]
    fn test_file_name_with_separator_rejected() {
        let mut user = UserConfig::default();
        user.build.lib.file_name = Some("out/client".into());
        let err = resolve(BuildMode::Production, &user, &project()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID_VALUE");
    }
}
