//! Configuration layering.
//!
//! Two YAML documents feed the effective configuration:
//!
//! ```text
//! ~/.probedock/config.yml     # user scope: servers and credentials
//! <project>/probedock.yml     # project scope: apiId, version, tags...
//! ```
//!
//! The project document is deep-merged over the user one, then the
//! `PROBEDOCK_*` environment variables override single leaves.
//!
//! | Environment Variable | Overrides |
//! |----------------------|-----------|
//! | `PROBEDOCK_SERVER` | `server` |
//! | `PROBEDOCK_PUBLISH` | `payload.publish` |
//! | `PROBEDOCK_PRINT_PAYLOAD` | `payload.print` |
//! | `PROBEDOCK_SAVE_PAYLOAD` | `payload.save` |
//! | `PROBEDOCK_CACHE_PAYLOAD` | `payload.cache` |
//! | `PROBEDOCK_WORKSPACE` | `workspace` |
//! | `PROBEDOCK_TEST_REPORT_UID` | run identifier |
//!
//! Required fields are checked where they are used, so a listener can start
//! with a partial configuration and still explain what is missing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::error::{ReporterError, ReporterResult};
use crate::report_log::ReportLog;

pub const USER_CONFIG_PATH: &str = ".probedock/config.yml";
pub const PROJECT_CONFIG_FILE: &str = "probedock.yml";

pub const ENV_SERVER: &str = "PROBEDOCK_SERVER";
pub const ENV_PUBLISH: &str = "PROBEDOCK_PUBLISH";
pub const ENV_PRINT_PAYLOAD: &str = "PROBEDOCK_PRINT_PAYLOAD";
pub const ENV_SAVE_PAYLOAD: &str = "PROBEDOCK_SAVE_PAYLOAD";
pub const ENV_CACHE_PAYLOAD: &str = "PROBEDOCK_CACHE_PAYLOAD";
pub const ENV_WORKSPACE: &str = "PROBEDOCK_WORKSPACE";
pub const ENV_TEST_REPORT_UID: &str = "PROBEDOCK_TEST_REPORT_UID";

/// Files written by this reporter live under `{workspace}/phpunit`.
const REPORTER_DIR: &str = "phpunit";

/// Effective configuration after merging and overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectiveConfig {
    /// Name of the active server in `servers`.
    pub server: Option<String>,

    /// Known servers by name.
    pub servers: BTreeMap<String, ServerConfig>,

    pub project: ProjectConfig,

    pub payload: PayloadConfig,

    /// Directory for the run UID, saved payloads and the cache.
    pub workspace: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(deserialize_with = "scalar_string")]
    pub api_id: Option<String>,

    /// Read as text even when written as a YAML number (`version: 2`).
    #[serde(deserialize_with = "scalar_string")]
    pub version: Option<String>,

    #[serde(deserialize_with = "lenient_string")]
    pub category: Option<String>,

    /// A list of scalars or a comma-separated string; anything else is ignored.
    #[serde(deserialize_with = "lenient_list")]
    pub tags: Vec<String>,

    #[serde(deserialize_with = "lenient_list")]
    pub tickets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub publish: bool,
    pub save: bool,
    pub print: bool,
    pub cache: bool,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            publish: true,
            save: false,
            print: false,
            cache: false,
        }
    }
}

/// Active server with its required fields resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerTarget {
    pub name: String,
    pub api_url: Url,
    pub api_token: String,
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a scalar value, found {:?}",
            other
        ))),
    }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer).map(scalar_text)?.filter(|s| !s.is_empty()))
}

fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Sequence(items) => items.into_iter().filter_map(scalar_text).collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

impl EffectiveConfig {
    /// Name of the active server.
    pub fn server_name(&self) -> ReporterResult<&str> {
        non_empty(self.server.as_ref()).ok_or_else(|| {
            ReporterError::config(
                "no Probe Dock server defined either by environment variable, either by config files.",
            )
        })
    }

    /// Resolve the active server's URL and token.
    pub fn server_target(&self) -> ReporterResult<ServerTarget> {
        let name = self.server_name()?;
        let server = self.servers.get(name);

        let raw_url = server
            .and_then(|s| non_empty(s.api_url.as_ref()))
            .ok_or_else(|| ReporterError::config(format!("no apiUrl found for {}.", name)))?;
        let api_url = Url::parse(raw_url).map_err(|e| {
            ReporterError::config(format!("invalid url for {} ({}): {}", name, raw_url, e))
        })?;

        let api_token = server
            .and_then(|s| non_empty(s.api_token.as_ref()))
            .ok_or_else(|| ReporterError::config(format!("missing apiToken for {}.", name)))?;

        Ok(ServerTarget {
            name: name.to_string(),
            api_url,
            api_token: api_token.to_string(),
        })
    }

    pub fn project_api_id(&self) -> ReporterResult<&str> {
        non_empty(self.project.api_id.as_ref())
            .ok_or_else(|| ReporterError::config("missing apiId for project in config files."))
    }

    pub fn project_version(&self) -> ReporterResult<&str> {
        non_empty(self.project.version.as_ref())
            .ok_or_else(|| ReporterError::config("missing version for project in config files."))
    }

    pub fn workspace_dir(&self) -> Option<&Path> {
        self.workspace
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// `{workspace}/phpunit/servers/{server}`, home of the saved payload and
    /// the fingerprint cache.
    pub fn server_dir(&self) -> ReporterResult<PathBuf> {
        let workspace = self
            .workspace_dir()
            .ok_or_else(|| ReporterError::config("no 'workspace' parameter in config files."))?;
        let server = self.server_name()?;
        Ok(workspace.join(REPORTER_DIR).join("servers").join(server))
    }
}

/// Environment overrides, kept raw so they can be echoed in the report log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub server: Option<String>,
    pub publish: Option<String>,
    pub print: Option<String>,
    pub save: Option<String>,
    pub cache: Option<String>,
    pub workspace: Option<String>,
    pub run_uid: Option<String>,
}

impl EnvOverrides {
    /// Read the `PROBEDOCK_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from explicit name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            server: lookup(ENV_SERVER),
            publish: lookup(ENV_PUBLISH),
            print: lookup(ENV_PRINT_PAYLOAD),
            save: lookup(ENV_SAVE_PAYLOAD),
            cache: lookup(ENV_CACHE_PAYLOAD),
            workspace: lookup(ENV_WORKSPACE),
            run_uid: lookup(ENV_TEST_REPORT_UID),
        }
    }

    /// Apply the overrides to a merged configuration.
    pub fn apply(&self, config: &mut EffectiveConfig, log: &mut ReportLog) {
        if let Some(server) = non_empty(self.server.as_ref()) {
            config.server = Some(server.to_string());
            log_override(log, ENV_SERVER, server);
        }

        let flags = [
            (ENV_PUBLISH, &self.publish, &mut config.payload.publish),
            (ENV_PRINT_PAYLOAD, &self.print, &mut config.payload.print),
            (ENV_SAVE_PAYLOAD, &self.save, &mut config.payload.save),
            (ENV_CACHE_PAYLOAD, &self.cache, &mut config.payload.cache),
        ];
        for (name, raw, target) in flags {
            if let Some(raw) = raw {
                *target = parse_bool(raw);
                log_override(log, name, raw);
            }
        }

        if let Some(workspace) = non_empty(self.workspace.as_ref()) {
            config.workspace = Some(PathBuf::from(workspace));
            log_override(log, ENV_WORKSPACE, workspace);
        }
    }
}

fn log_override(log: &mut ReportLog, name: &str, value: &str) {
    log.warning(format!(
        "use environment variable instead of config files ({}={}).",
        name, value
    ));
}

/// `1`, `true` and `t` (any case) are true, everything else is false.
pub fn parse_bool(raw: &str) -> bool {
    let raw = raw.trim();
    raw == "1" || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("t")
}

/// Deep merge with list concatenation.
///
/// Mappings on both sides merge recursively, sequences on both sides
/// concatenate (base items first), anything else takes the overriding value.
pub fn deep_merge(base: Value, overriding: Value) -> Value {
    match (base, overriding) {
        (Value::Mapping(mut base), Value::Mapping(overriding)) => {
            for (key, value) in overriding {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (Value::Sequence(mut base), Value::Sequence(overriding)) => {
            base.extend(overriding);
            Value::Sequence(base)
        }
        (_, overriding) => overriding,
    }
}

/// Raw configuration trees, before merging.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub user: Option<Value>,
    pub project: Option<Value>,
}

impl ConfigSources {
    /// Read and parse both config files.
    ///
    /// A file that is missing or does not parse is skipped with a warning; the
    /// load only fails when neither yields a document.
    pub async fn load(
        home: &Path,
        project_dir: &Path,
        log: &mut ReportLog,
    ) -> ReporterResult<Self> {
        let user_path = home.join(USER_CONFIG_PATH);
        let project_path = project_dir.join(PROJECT_CONFIG_FILE);

        let user_text = read_optional(&user_path).await;
        let project_text = read_optional(&project_path).await;

        if user_text.is_none() && project_text.is_none() {
            return Err(ReporterError::config(format!(
                "Unable to load both Probe Dock user config file ({}) and Probe Dock project config file ({}).",
                user_path.display(),
                project_path.display()
            )));
        }

        let sources = Self {
            user: user_text.and_then(|t| parse_document(&user_path, &t, log)),
            project: project_text.and_then(|t| parse_document(&project_path, &t, log)),
        };

        if sources.user.is_none() && sources.project.is_none() {
            return Err(ReporterError::config(format!(
                "Unable to parse both Probe Dock user config file ({}) and Probe Dock project config file ({}).",
                user_path.display(),
                project_path.display()
            )));
        }

        Ok(sources)
    }

    /// Parse both documents from text (for hosts that read the files themselves).
    pub fn from_yaml(
        user: Option<&str>,
        project: Option<&str>,
        log: &mut ReportLog,
    ) -> Self {
        Self {
            user: user.and_then(|t| parse_document(Path::new(USER_CONFIG_PATH), t, log)),
            project: project
                .and_then(|t| parse_document(Path::new(PROJECT_CONFIG_FILE), t, log)),
        }
    }
}

async fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(text) => Some(text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "config file not loaded");
            None
        }
    }
}

fn parse_document(path: &Path, text: &str, log: &mut ReportLog) -> Option<Value> {
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            log.warning(format!("unable to parse {}: {}", path.display(), e));
            None
        }
    }
}

/// Merge the sources and apply the environment overrides.
pub fn resolve(
    sources: ConfigSources,
    env: &EnvOverrides,
    log: &mut ReportLog,
) -> ReporterResult<EffectiveConfig> {
    let merged = match (sources.user, sources.project) {
        (Some(user), Some(project)) => deep_merge(user, project),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => {
            return Err(ReporterError::config(
                "no usable Probe Dock configuration (user and project config files are both missing or invalid).",
            ))
        }
    };

    let mut config: EffectiveConfig = serde_yaml::from_value(merged)
        .map_err(|e| ReporterError::config(format!("invalid configuration: {}", e)))?;

    env.apply(&mut config, log);
    debug!(server = ?config.server, publish = config.payload.publish, "resolved configuration");
    Ok(config)
}

/// Pick the run identifier: environment, then `{workspace}/uid`, then a fresh
/// UUID.
pub async fn resolve_run_uid(
    env: &EnvOverrides,
    config: &EffectiveConfig,
) -> ReporterResult<String> {
    if let Some(uid) = non_empty(env.run_uid.as_ref()) {
        return Ok(uid.to_string());
    }

    if let Some(workspace) = config.workspace_dir() {
        let uid_path = workspace.join("uid");
        if uid_path.exists() {
            let uid = fs::read_to_string(&uid_path).await.unwrap_or_default();
            let uid = uid.trim();
            if uid.is_empty() {
                return Err(ReporterError::config(
                    "A UID file exists in workspace, but it cannot be read.",
                ));
            }
            return Ok(uid.to_string());
        }
    }

    Ok(uuid::Uuid::new_v4().to_string())
}
