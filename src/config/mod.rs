use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip, default = "default_paths")]
    pub paths: Paths,

    /// File this config was loaded from (not serialized)
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub package_manager: PackageManagerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// In-sandbox directory local repos are mounted under
    #[serde(default = "default_host_repo_dir")]
    pub host_repo_dir: String,

    /// Program used to enter the sandbox root
    #[serde(default = "default_chroot")]
    pub chroot: String,

    /// Shell that interprets command lines inside the sandbox
    #[serde(default = "default_shell")]
    pub shell: String,

    /// PATH for commands run inside the sandbox
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Extra environment variables for sandboxed commands
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManagerConfig {
    /// Package manager binary inside the sandbox
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Index file expected at the root of every local repo
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Flags added to every package manager invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when neither --verbose nor RUST_LOG is given
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log line format: "text" | "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_paths() -> Paths {
    Paths::resolve().unwrap_or_else(|_| Paths {
        config_dir: PathBuf::from("/etc/repobind"),
        state_dir: PathBuf::from("/var/lib/repobind"),
        runtime_dir: None,
    })
}
fn default_host_repo_dir() -> String {
    "/hostRepos".to_string()
}
fn default_chroot() -> String {
    "chroot".to_string()
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_sandbox_path() -> String {
    "/usr/bin:/usr/sbin:/bin:/sbin".to_string()
}
fn default_binary() -> String {
    "eopkg".to_string()
}
fn default_index_file() -> String {
    "eopkg-index.xml.xz".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: default_paths(),
            source: None,
            sandbox: SandboxConfig::default(),
            package_manager: PackageManagerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            host_repo_dir: default_host_repo_dir(),
            chroot: default_chroot(),
            shell: default_shell(),
            path: default_sandbox_path(),
            env: BTreeMap::new(),
        }
    }
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            index_file: default_index_file(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load from `explicit` if given, otherwise from the XDG config file,
    /// writing the default template there on first run.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;

        if let Some(path) = explicit {
            let mut config = Self::from_file(path)?;
            config.paths = paths;
            return Ok(config);
        }

        paths.ensure_dirs()?;
        let path = paths.config_file();
        if !path.exists() {
            let config = Config {
                paths,
                source: Some(path),
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let mut config = Self::from_file(&path)?;
        config.paths = paths;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        validate_host_repo_dir(&config.sandbox.host_repo_dir)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Path this config reads from and saves to.
    pub fn file_path(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| self.paths.config_file())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.file_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.file_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["sandbox", "host_repo_dir"] => Ok(self.sandbox.host_repo_dir.clone()),
            ["sandbox", "chroot"] => Ok(self.sandbox.chroot.clone()),
            ["sandbox", "shell"] => Ok(self.sandbox.shell.clone()),
            ["sandbox", "path"] => Ok(self.sandbox.path.clone()),
            ["sandbox", "env", name] => self
                .sandbox
                .env
                .get(*name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Sandbox env var not set: {}", name)),
            ["package_manager", "binary"] => Ok(self.package_manager.binary.clone()),
            ["package_manager", "index_file"] => Ok(self.package_manager.index_file.clone()),
            ["package_manager", "extra_args"] => Ok(self.package_manager.extra_args.join(" ")),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["sandbox", "host_repo_dir"] => {
                validate_host_repo_dir(value)?;
                self.sandbox.host_repo_dir = value.to_string()
            }
            ["sandbox", "chroot"] => self.sandbox.chroot = value.to_string(),
            ["sandbox", "shell"] => self.sandbox.shell = value.to_string(),
            ["sandbox", "path"] => self.sandbox.path = value.to_string(),
            ["sandbox", "env", name] => {
                self.sandbox.env.insert(name.to_string(), value.to_string());
            }
            ["package_manager", "binary"] => self.package_manager.binary = value.to_string(),
            ["package_manager", "index_file"] => {
                self.package_manager.index_file = value.to_string()
            }
            ["package_manager", "extra_args"] => {
                self.package_manager.extra_args =
                    value.split_whitespace().map(str::to_string).collect()
            }
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => match value {
                "text" | "json" => self.logging.format = value.to_string(),
                _ => anyhow::bail!("logging.format must be \"text\" or \"json\""),
            },
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

/// `sandbox.host_repo_dir` must be an absolute path below `/` made of plain
/// names, so mount targets cannot leave the sandbox root.
pub fn validate_host_repo_dir(value: &str) -> Result<()> {
    let path = Path::new(value);
    if !path.is_absolute() {
        anyhow::bail!("sandbox.host_repo_dir must be an absolute path, got {:?}", value);
    }
    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::RootDir => {}
            Component::Normal(_) => normal += 1,
            _ => anyhow::bail!(
                "sandbox.host_repo_dir must not contain '..', got {:?}",
                value
            ),
        }
    }
    if normal == 0 {
        anyhow::bail!("sandbox.host_repo_dir must not be the sandbox root");
    }
    Ok(())
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# repobind configuration

[sandbox]
# In-sandbox directory local repositories are bind-mounted under
host_repo_dir = "/hostRepos"

# Program used to enter the sandbox root, and the shell run inside it
chroot = "chroot"
shell = "/bin/sh"

# PATH for commands run inside the sandbox
path = "/usr/bin:/usr/sbin:/bin:/sbin"

# Extra environment for sandboxed commands
# [sandbox.env]
# LANG = "en_US.UTF-8"

[package_manager]
binary = "eopkg"

# Index file expected at the root of every local repository
index_file = "eopkg-index.xml.xz"

# Flags added to every package manager invocation
extra_args = []

[logging]
level = "info"

# "text" or "json"
format = "text"
"#;
