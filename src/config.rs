//! Configuration for the sync controller.
//!
//! Configuration is loaded from TOML and validated before booting to catch
//! errors early. Every field has a default, so an empty file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sandbox::LocalSandboxConfig;
use crate::surface::PLACEHOLDER_URL;
use crate::template::{path_segments, starter};

/// What to do with edits that arrive before the sandbox is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EditPolicy {
    /// Queue edits and write them in order once the sandbox is ready.
    #[default]
    Queue,
    /// Reject edits with [`Error::NotReady`].
    Reject,
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Creates a command spec.
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Configuration for a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Path of the file bound to the editable surface.
    #[serde(default = "default_editable_path")]
    pub editable_path: String,

    /// JSON template to mount instead of the built-in starter project.
    #[serde(default)]
    pub template_path: Option<PathBuf>,

    /// Dependency install command.
    #[serde(default = "default_install")]
    pub install: CommandSpec,

    /// Long-running dev server command.
    #[serde(default = "default_dev_server")]
    pub dev_server: CommandSpec,

    /// Location the preview shows until a server is ready.
    #[serde(default = "default_placeholder")]
    pub placeholder_url: String,

    /// Handling of edits made before the sandbox is ready.
    #[serde(default)]
    pub edit_policy: EditPolicy,

    #[serde(default = "default_boot_timeout")]
    pub boot_timeout_secs: u64,

    #[serde(default = "default_mount_timeout")]
    pub mount_timeout_secs: u64,

    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Settings for host-directory sandboxes.
    #[serde(default)]
    pub sandbox: LocalSandboxConfig,
}

fn default_editable_path() -> String {
    starter::EDITABLE_PATH.to_string()
}

fn default_install() -> CommandSpec {
    CommandSpec::new("npm", &["install"])
}

fn default_dev_server() -> CommandSpec {
    CommandSpec::new("npm", &["run", "dev"])
}

fn default_placeholder() -> String {
    PLACEHOLDER_URL.to_string()
}

fn default_boot_timeout() -> u64 {
    60
}

fn default_mount_timeout() -> u64 {
    30
}

fn default_install_timeout() -> u64 {
    600
}

fn default_ready_timeout() -> u64 {
    300
}

fn default_write_timeout() -> u64 {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            editable_path: default_editable_path(),
            template_path: None,
            install: default_install(),
            dev_server: default_dev_server(),
            placeholder_url: default_placeholder(),
            edit_policy: EditPolicy::default(),
            boot_timeout_secs: default_boot_timeout(),
            mount_timeout_secs: default_mount_timeout(),
            install_timeout_secs: default_install_timeout(),
            ready_timeout_secs: default_ready_timeout(),
            write_timeout_secs: default_write_timeout(),
            sandbox: LocalSandboxConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(|e| match e {
            Error::Toml { reason, .. } => Error::Toml {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Toml {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Sets the edit policy.
    pub fn with_edit_policy(mut self, policy: EditPolicy) -> Self {
        self.edit_policy = policy;
        self
    }

    /// Sets the install timeout, rounded up to whole seconds.
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout_secs = whole_secs(timeout);
        self
    }

    /// Sets the server-ready timeout, rounded up to whole seconds.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_secs = whole_secs(timeout);
        self
    }

    /// Sets the sandbox boot timeout, rounded up to whole seconds.
    pub fn with_boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout_secs = whole_secs(timeout);
        self
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn mount_timeout(&self) -> Duration {
        Duration::from_secs(self.mount_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Rounds up so a sub-second timeout never becomes zero.
fn whole_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Problems found in a sync configuration.
///
/// Errors stop the session from booting; warnings are logged at startup.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// True when the configuration can be used to boot.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Folds in the findings for a nested section, such as a command.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Returns the warnings, or every error joined into [`Error::Config`].
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Checks a configuration section before the sandbox boots.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

impl Validate for CommandSpec {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        if self.program.trim().is_empty() {
            result.add_error("command program cannot be empty");
        }
        result
    }
}

impl Validate for SyncConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !self.editable_path.starts_with('/') || path_segments(&self.editable_path).is_err() {
            result.add_error(format!(
                "editable_path '{}' must be an absolute sandbox path",
                self.editable_path
            ));
        }

        result.merge(self.install.validate());
        result.merge(self.dev_server.validate());

        for (name, secs) in [
            ("boot_timeout_secs", self.boot_timeout_secs),
            ("mount_timeout_secs", self.mount_timeout_secs),
            ("install_timeout_secs", self.install_timeout_secs),
            ("ready_timeout_secs", self.ready_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
        ] {
            if secs == 0 {
                result.add_error(format!("{} must be greater than zero", name));
            }
        }

        if self.install_timeout_secs > 3600 {
            result.add_warning("install_timeout_secs over 1 hour may indicate a misconfiguration");
        }

        if self.placeholder_url.trim().is_empty() {
            result.add_error("placeholder_url cannot be empty");
        }

        if let Some(path) = &self.template_path {
            if !path.exists() {
                result.add_error(format!("template_path {} does not exist", path.display()));
            }
        }

        if let Some(port) = self.sandbox.probe_port {
            if port == 0 {
                result.add_error("sandbox.probe_port cannot be 0");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_has_sensible_defaults() {
        let config = SyncConfig::default();

        assert_eq!(config.editable_path, "/src/server/liveview/hello.ts");
        assert_eq!(config.install, CommandSpec::new("npm", &["install"]));
        assert_eq!(config.dev_server, CommandSpec::new("npm", &["run", "dev"]));
        assert_eq!(config.placeholder_url, "loading.html");
        assert_eq!(config.edit_policy, EditPolicy::Queue);
        assert_eq!(config.install_timeout(), Duration::from_secs(600));
        assert!(config.validate().is_valid());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = SyncConfig::from_toml("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn toml_overrides_fields() {
        let config = SyncConfig::from_toml(
            r#"
            editable_path = "/src/app.ts"
            edit_policy = "reject"
            install_timeout_secs = 120

            [dev_server]
            program = "pnpm"
            args = ["dev"]

            [sandbox]
            keep = true
            probe_port = 4001
            env = { PORT = "4001" }
            "#,
        )
        .unwrap();

        assert_eq!(config.editable_path, "/src/app.ts");
        assert_eq!(config.edit_policy, EditPolicy::Reject);
        assert_eq!(config.install_timeout_secs, 120);
        assert_eq!(config.dev_server, CommandSpec::new("pnpm", &["dev"]));
        assert!(config.sandbox.keep);
        assert_eq!(config.sandbox.probe_port, Some(4001));
        assert_eq!(config.sandbox.env.get("PORT").map(String::as_str), Some("4001"));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = SyncConfig::from_toml("install_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::Toml { .. }));
    }

    #[test]
    fn validation_rejects_zero_timeouts() {
        let config = SyncConfig {
            write_timeout_secs: 0,
            ..Default::default()
        };
        let result = config.validate();

        assert!(!result.is_valid());
        assert!(result.errors[0].contains("write_timeout_secs"));
    }

    #[test]
    fn validation_rejects_relative_editable_path() {
        let config = SyncConfig {
            editable_path: "src/app.ts".to_string(),
            ..Default::default()
        };
        assert!(!config.validate().is_valid());

        let config = SyncConfig {
            editable_path: "/src/../app.ts".to_string(),
            ..Default::default()
        };
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn validation_rejects_empty_program() {
        let config = SyncConfig {
            install: CommandSpec::new("  ", &[]),
            ..Default::default()
        };
        let err = config.validate().into_result().unwrap_err();

        assert!(err.to_string().contains("command program cannot be empty"));
    }

    #[test]
    fn sub_second_timeouts_round_up() {
        let config = SyncConfig::default()
            .with_install_timeout(Duration::from_millis(500))
            .with_ready_timeout(Duration::from_millis(1500))
            .with_boot_timeout(Duration::from_secs(2));

        assert_eq!(config.install_timeout(), Duration::from_secs(1));
        assert_eq!(config.ready_timeout(), Duration::from_secs(2));
        assert_eq!(config.boot_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_valid());
    }

    #[test]
    fn validation_warns_on_long_install_timeout() {
        let config = SyncConfig::default().with_install_timeout(Duration::from_secs(7200));
        let warnings = config.validate().into_result().unwrap();

        assert_eq!(warnings.len(), 1);
    }
}
