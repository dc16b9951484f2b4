//! Verifier configuration.
//!
//! Configuration is a fixed schema read from TOML, then patched with
//! `KVERIFY_*` environment overrides, then validated once. Lookup order for
//! the file:
//! 1. An explicit path (`--config`)
//! 2. `./.kverify.toml`
//! 3. `<user config dir>/kverify/config.toml`
//! 4. Built-in defaults

pub mod env;

pub use env::{ENV_OVERRIDE_PREFIX, EnvError, EnvParser};

use crate::script::Elevation;
use crate::shellout::ShellOutOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Project-local config file name.
pub const LOCAL_CONFIG_FILE: &str = ".kverify.toml";

/// Upper bound accepted for `sleep` overrides (one hour).
const MAX_SLEEP_SECS: u64 = 3600;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid environment overrides: {}", format_env_errors(.0))]
    Env(Vec<EnvError>),
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn default_format() -> String {
    "documentation".to_string()
}

fn default_path() -> String {
    "/tmp/kitchen".to_string()
}

fn default_install_command() -> String {
    "bundle install".to_string()
}

fn default_sudo_command() -> String {
    "sudo -E".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    15
}

/// SSH defaults used when the instance state does not carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSettings {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            username: default_username(),
            port: default_port(),
            ssh_key: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Serverspec verifier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifierConfig {
    /// Seconds to wait before verifying.
    #[serde(default)]
    pub sleep: u64,
    /// Full replacement for the generated runner script.
    #[serde(default)]
    pub serverspec_command: Option<String>,
    /// Command for local mode (`remote_exec = false`).
    #[serde(default)]
    pub command: Option<String>,
    /// Options for the local shell-out.
    #[serde(default)]
    pub shellout_opts: ShellOutOptions,
    /// Run over the transport (true) or locally (false).
    #[serde(default = "default_true")]
    pub remote_exec: bool,
    /// RSpec formatter.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub color: bool,
    /// Target-side directory holding the suite and its Gemfile.
    #[serde(default = "default_path")]
    pub default_path: String,
    /// RSpec patterns, one invocation each, in order.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Local Gemfile transcribed onto the target.
    #[serde(default)]
    pub gemfile: Option<PathBuf>,
    /// Dependency install command, run against the target Gemfile.
    #[serde(default = "default_install_command")]
    pub install_command: String,
    /// Skip the Serverspec install when the gem is already present.
    #[serde(default = "default_true")]
    pub test_serverspec_installed: bool,
    /// Appended verbatim to every RSpec invocation.
    #[serde(default)]
    pub extra_flags: Option<String>,
    /// Remove `default_path` after all patterns pass.
    #[serde(default)]
    pub remove_default_path: bool,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    /// Wrap privileged commands with `sudo_command`.
    #[serde(default = "default_true")]
    pub sudo: bool,
    #[serde(default = "default_sudo_command")]
    pub sudo_command: String,
    #[serde(default)]
    pub transport: SshSettings,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            sleep: 0,
            serverspec_command: None,
            command: None,
            shellout_opts: ShellOutOptions::default(),
            remote_exec: true,
            format: default_format(),
            color: true,
            default_path: default_path(),
            patterns: Vec::new(),
            gemfile: None,
            install_command: default_install_command(),
            test_serverspec_installed: true,
            extra_flags: None,
            remove_default_path: false,
            http_proxy: None,
            https_proxy: None,
            sudo: true,
            sudo_command: default_sudo_command(),
            transport: SshSettings::default(),
        }
    }
}

impl VerifierConfig {
    /// Parse TOML text without validating.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })
    }

    /// Read and parse a config file without validating.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Locate, parse, override from the process environment and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match discover_config_path(explicit) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        let config = config.with_env_overrides(&mut EnvParser::new())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KVERIFY_*` overrides. All invalid values are reported together.
    pub fn with_env_overrides(mut self, parser: &mut EnvParser) -> Result<Self, ConfigError> {
        if let Some(sleep) = parser.get_u64_range("SLEEP", 0, MAX_SLEEP_SECS) {
            self.sleep = sleep;
        }
        if let Some(remote_exec) = parser.get_bool("REMOTE_EXEC") {
            self.remote_exec = remote_exec;
        }
        if let Some(format) = parser.get_string("FORMAT") {
            self.format = format;
        }
        if let Some(color) = parser.get_bool("COLOR") {
            self.color = color;
        }
        if let Some(path) = parser.get_string("DEFAULT_PATH") {
            self.default_path = path;
        }
        if let Some(patterns) = parser.get_string_list("PATTERNS") {
            self.patterns = patterns;
        }
        if let Some(flags) = parser.get_optional_string("EXTRA_FLAGS") {
            self.extra_flags = flags;
        }
        if let Some(remove) = parser.get_bool("REMOVE_DEFAULT_PATH") {
            self.remove_default_path = remove;
        }
        if let Some(proxy) = parser.get_optional_string("HTTP_PROXY") {
            self.http_proxy = proxy;
        }
        if let Some(proxy) = parser.get_optional_string("HTTPS_PROXY") {
            self.https_proxy = proxy;
        }
        if let Some(sudo) = parser.get_bool("SUDO") {
            self.sudo = sudo;
        }
        if let Some(command) = parser.get_optional_string("SERVERSPEC_COMMAND") {
            self.serverspec_command = command;
        }

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok(self)
    }

    /// Check the invariants the script builders rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "default_path",
                reason: format!("must be an absolute path, got '{}'", self.default_path),
            });
        }
        if self.default_path.trim_end_matches('/').is_empty() {
            return Err(ConfigError::Invalid {
                field: "default_path",
                reason: "must not be the filesystem root".to_string(),
            });
        }
        if self.format.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "format",
                reason: "must not be empty".to_string(),
            });
        }
        if self.install_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "install_command",
                reason: "must not be empty".to_string(),
            });
        }
        if self.sudo && self.sudo_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "sudo_command",
                reason: "must not be empty while sudo is enabled".to_string(),
            });
        }
        if !self.remote_exec && self.local_command().is_none() {
            return Err(ConfigError::Invalid {
                field: "command",
                reason: "local mode (remote_exec = false) needs `command` or `serverspec_command`"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Command run in local mode: `command`, falling back to
    /// `serverspec_command`.
    pub fn local_command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .or(self.serverspec_command.as_deref())
            .filter(|c| !c.trim().is_empty())
    }

    /// Target-side directory without a trailing slash.
    pub fn target_dir(&self) -> &str {
        self.default_path.trim_end_matches('/')
    }

    /// Target-side path of the Gemfile.
    pub fn manifest_path(&self) -> String {
        format!("{}/Gemfile", self.target_dir())
    }

    /// Elevation wrapper for privileged steps, carrying any proxy settings.
    pub fn elevation(&self) -> Elevation {
        let mut elevation = if self.sudo {
            Elevation::sudo(self.sudo_command.trim())
        } else {
            Elevation::none()
        };
        if let Some(proxy) = &self.http_proxy {
            elevation = elevation.with_env("http_proxy", proxy);
        }
        if let Some(proxy) = &self.https_proxy {
            elevation = elevation.with_env("https_proxy", proxy);
        }
        elevation
    }
}

/// Resolve which config file to read, if any. An explicit path is returned
/// even when missing so the read error surfaces.
pub fn discover_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("kverify").join("config.toml"))
        .filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.sleep, 0);
        assert!(config.remote_exec);
        assert_eq!(config.format, "documentation");
        assert!(config.color);
        assert_eq!(config.default_path, "/tmp/kitchen");
        assert!(config.patterns.is_empty());
        assert_eq!(config.install_command, "bundle install");
        assert!(config.test_serverspec_installed);
        assert!(!config.remove_default_path);
        assert_eq!(config.sudo_command, "sudo -E");
        assert_eq!(config.transport.port, 22);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_equals_default() {
        let config = VerifierConfig::from_toml_str("").unwrap();
        assert_eq!(config, VerifierConfig::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let config = VerifierConfig::from_toml_str(
            r#"
sleep = 2
remote_exec = true
format = "progress"
color = false
default_path = "/srv/verify"
patterns = ["/srv/verify/spec/a_spec.rb", "/srv/verify/spec/b_spec.rb"]
extra_flags = "--require spec_helper"
remove_default_path = true
http_proxy = "http://proxy:3128"

[shellout_opts]
timeout_secs = 30

[shellout_opts.environment]
LANG = "C"

[transport]
username = "vagrant"
port = 2222
"#,
        )
        .unwrap();

        assert_eq!(config.sleep, 2);
        assert_eq!(config.format, "progress");
        assert!(!config.color);
        assert_eq!(config.patterns.len(), 2);
        assert_eq!(config.extra_flags.as_deref(), Some("--require spec_helper"));
        assert_eq!(config.shellout_opts.timeout_secs, 30);
        assert_eq!(config.shellout_opts.environment["LANG"], "C");
        assert_eq!(config.transport.username, "vagrant");
        assert_eq!(config.transport.port, 2222);
        assert_eq!(config.transport.connect_timeout_secs, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = VerifierConfig::from_toml_str("install_commmand = \"bundle\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_relative_default_path() {
        let config = VerifierConfig {
            default_path: "tmp/kitchen".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "default_path", .. }));
    }

    #[test]
    fn test_validate_root_default_path() {
        let config = VerifierConfig {
            default_path: "/".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_local_mode_needs_command() {
        let mut config = VerifierConfig {
            remote_exec: false,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "command", .. }));

        config.serverspec_command = Some("rspec spec".into());
        assert!(config.validate().is_ok());
        assert_eq!(config.local_command(), Some("rspec spec"));

        config.command = Some("bundle exec rspec".into());
        assert_eq!(config.local_command(), Some("bundle exec rspec"));
    }

    #[test]
    fn test_validate_empty_sudo_command() {
        let config = VerifierConfig {
            sudo_command: " ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VerifierConfig {
            sudo: false,
            sudo_command: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut parser = EnvParser::with_vars([
            ("KVERIFY_SLEEP", "3"),
            ("KVERIFY_COLOR", "false"),
            ("KVERIFY_PATTERNS", "a_spec.rb,b_spec.rb"),
            ("KVERIFY_HTTP_PROXY", "http://p:1"),
            ("KVERIFY_REMOTE_EXEC", "no"),
            ("KVERIFY_SERVERSPEC_COMMAND", "rspec"),
        ]);
        let config = VerifierConfig::default()
            .with_env_overrides(&mut parser)
            .unwrap();

        assert_eq!(config.sleep, 3);
        assert!(!config.color);
        assert_eq!(config.patterns, vec!["a_spec.rb", "b_spec.rb"]);
        assert_eq!(config.http_proxy.as_deref(), Some("http://p:1"));
        assert!(!config.remote_exec);
        assert_eq!(config.serverspec_command.as_deref(), Some("rspec"));
    }

    #[test]
    fn test_env_overrides_collect_all_errors() {
        let mut parser = EnvParser::with_vars([
            ("KVERIFY_SLEEP", "forever"),
            ("KVERIFY_COLOR", "blue"),
        ]);
        let err = VerifierConfig::default()
            .with_env_overrides(&mut parser)
            .unwrap_err();
        match err {
            ConfigError::Env(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_manifest_path_strips_trailing_slash() {
        let config = VerifierConfig {
            default_path: "/tmp/kitchen/".into(),
            ..Default::default()
        };
        assert_eq!(config.target_dir(), "/tmp/kitchen");
        assert_eq!(config.manifest_path(), "/tmp/kitchen/Gemfile");
    }

    #[test]
    fn test_elevation_carries_proxies() {
        let config = VerifierConfig {
            http_proxy: Some("http://p:1".into()),
            https_proxy: Some("http://p:2".into()),
            ..Default::default()
        };
        let elevation = config.elevation();
        assert_eq!(elevation.prefix.as_deref(), Some("sudo -E"));
        assert_eq!(
            elevation.env,
            vec![
                ("http_proxy".to_string(), "http://p:1".to_string()),
                ("https_proxy".to_string(), "http://p:2".to_string()),
            ]
        );

        let config = VerifierConfig {
            sudo: false,
            ..Default::default()
        };
        assert_eq!(config.elevation(), Elevation::none());
    }

    #[test]
    fn test_from_file_and_load_explicit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "format = \"json\"\npatterns = [\"spec/x_spec.rb\"]").unwrap();

        let config = VerifierConfig::from_file(file.path()).unwrap();
        assert_eq!(config.format, "json");
        assert_eq!(config.patterns, vec!["spec/x_spec.rb"]);
    }

    #[test]
    fn test_from_file_missing() {
        let err = VerifierConfig::from_file(Path::new("/nonexistent/kverify.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_discover_prefers_explicit() {
        let explicit = Path::new("/nonexistent/explicit.toml");
        assert_eq!(discover_config_path(Some(explicit)), Some(explicit.to_path_buf()));
    }
}
