//! Layered terminal configuration.
//!
//! Values resolve as built-in defaults < user overrides < environment. Every getter
//! recomputes from the layers on each call; [`ConfigHelper::snapshot`] captures the
//! presentation-facing subset as an immutable value that instances can hold.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::{Result, TerminalError};
use super::{DEFAULT_SCROLLBACK_LINES, MAX_CONCURRENT_INSTANCES};

pub const ENV_SHELL: &str = "SHELLPLEX_SHELL";
pub const ENV_CWD: &str = "SHELLPLEX_CWD";
pub const ENV_SCROLLBACK: &str = "SHELLPLEX_SCROLLBACK";

/// Shell used when neither configuration nor environment names one
pub const FALLBACK_UNIX_SHELL: &str = "sh";
pub const FALLBACK_WINDOWS_SHELL: &str = "cmd.exe";

const DEFAULT_FONT_SIZE: f32 = 14.0;
const DEFAULT_LINE_HEIGHT: f32 = 1.0;

/// Host platform flavour, used to pick per-platform shell settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Osx,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Osx
        } else {
            Self::Linux
        }
    }

    /// Line terminator appended by `send_text` when a newline is requested
    pub fn line_ending(&self) -> &'static str {
        match self {
            Self::Windows => "\r\n",
            Self::Linux | Self::Osx => "\n",
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Osx => write!(f, "osx"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// A setting that may be overridden separately for each platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformValues<T> {
    pub linux: Option<T>,
    pub osx: Option<T>,
    pub windows: Option<T>,
}

impl<T> Default for PlatformValues<T> {
    fn default() -> Self {
        Self {
            linux: None,
            osx: None,
            windows: None,
        }
    }
}

impl<T> PlatformValues<T> {
    pub fn get(&self, platform: Platform) -> Option<&T> {
        match platform {
            Platform::Linux => self.linux.as_ref(),
            Platform::Osx => self.osx.as_ref(),
            Platform::Windows => self.windows.as_ref(),
        }
    }
}

/// User override layer. Every key is optional; unset keys fall through to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub shell: PlatformValues<String>,
    pub shell_args: PlatformValues<Vec<String>>,
    pub right_click_copy_paste: Option<bool>,
    pub cursor_blinking: Option<bool>,
    pub font_family: Option<String>,
    pub font_ligatures: Option<bool>,
    pub font_size: Option<f32>,
    pub line_height: Option<f32>,
    pub set_locale_variables: Option<bool>,
    pub scrollback: Option<usize>,
    pub commands_to_skip_shell: Option<Vec<String>>,
    pub cwd: Option<PathBuf>,
    /// Directory for per-instance JSON-lines transcripts; disabled when unset
    pub transcript_dir: Option<PathBuf>,
    pub max_instances: Option<usize>,
}

impl TerminalSettings {
    /// Parse user overrides from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TerminalError::Config(e.message().to_string()))
    }

    /// Load user overrides from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            TerminalError::Config(reason) => {
                TerminalError::Config(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }
}

/// Font settings handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalFont {
    pub font_family: String,
    pub font_size: f32,
    pub line_height: f32,
    pub ligatures: bool,
}

/// Immutable copy of the settings an instance applies to itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub font: TerminalFont,
    pub cursor_blink: bool,
    pub right_click_copy_paste: bool,
    pub scrollback: usize,
    pub commands_to_skip_shell: Vec<String>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        ConfigHelper::new().snapshot()
    }
}

/// Where the environment layer reads from
#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    fn var(&self, key: &str) -> Option<String> {
        let value = match self {
            Self::Process => std::env::var(key).ok(),
            Self::Fixed(vars) => vars.get(key).cloned(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Resolves shell defaults and presentation settings from the configuration layers
#[derive(Debug, Clone)]
pub struct ConfigHelper {
    platform: Platform,
    user: TerminalSettings,
    env: EnvSource,
    workspace_root: Option<PathBuf>,
}

impl Default for ConfigHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigHelper {
    /// Helper for the current platform with no user overrides
    pub fn new() -> Self {
        Self {
            platform: Platform::current(),
            user: TerminalSettings::default(),
            env: EnvSource::Process,
            workspace_root: None,
        }
    }

    pub fn with_settings(mut self, settings: TerminalSettings) -> Self {
        self.user = settings;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the process environment with a fixed set of variables
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = EnvSource::Fixed(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Root that relative `cwd` settings resolve against
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn settings(&self) -> &TerminalSettings {
        &self.user
    }

    pub fn set_settings(&mut self, settings: TerminalSettings) {
        self.user = settings;
    }

    /// Look up a variable in the environment layer
    pub fn env_var(&self, key: &str) -> Option<String> {
        self.env.var(key)
    }

    /// Shell executable for this platform. Never fails: falls back to a minimal shell.
    pub fn get_shell(&self) -> String {
        if let Some(shell) = self.env.var(ENV_SHELL) {
            return shell;
        }
        if let Some(shell) = self.user.shell.get(self.platform).filter(|s| !s.trim().is_empty()) {
            return shell.clone();
        }
        if self.platform.is_windows() {
            self.env
                .var("COMSPEC")
                .unwrap_or_else(|| FALLBACK_WINDOWS_SHELL.to_string())
        } else {
            self.env
                .var("SHELL")
                .unwrap_or_else(|| FALLBACK_UNIX_SHELL.to_string())
        }
    }

    pub fn get_shell_args(&self) -> Vec<String> {
        match self.user.shell_args.get(self.platform) {
            Some(args) => args.clone(),
            None if self.platform == Platform::Osx => vec!["-l".to_string()],
            None => Vec::new(),
        }
    }

    pub fn get_font(&self) -> TerminalFont {
        let font_family = self
            .user
            .font_family
            .clone()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| self.default_font_family().to_string());

        TerminalFont {
            font_family,
            font_size: self.user.font_size.filter(|s| *s > 0.0).unwrap_or(DEFAULT_FONT_SIZE),
            line_height: self.user.line_height.filter(|h| *h > 0.0).unwrap_or(DEFAULT_LINE_HEIGHT),
            ligatures: self.get_font_ligatures_enabled(),
        }
    }

    pub fn get_font_ligatures_enabled(&self) -> bool {
        self.user.font_ligatures.unwrap_or(false)
    }

    pub fn get_cursor_blink(&self) -> bool {
        self.user.cursor_blinking.unwrap_or(false)
    }

    pub fn get_right_click_copy_paste(&self) -> bool {
        self.user
            .right_click_copy_paste
            .unwrap_or_else(|| self.platform.is_windows())
    }

    pub fn get_commands_to_skip_shell(&self) -> Vec<String> {
        self.user.commands_to_skip_shell.clone().unwrap_or_default()
    }

    pub fn get_scrollback(&self) -> usize {
        if let Some(raw) = self.env.var(ENV_SCROLLBACK) {
            match raw.trim().parse::<usize>() {
                Ok(lines) => return lines,
                Err(_) => log::warn!("Ignoring invalid {}={:?}", ENV_SCROLLBACK, raw),
            }
        }
        self.user.scrollback.unwrap_or(DEFAULT_SCROLLBACK_LINES)
    }

    pub fn get_set_locale_variables(&self) -> bool {
        self.user
            .set_locale_variables
            .unwrap_or(self.platform == Platform::Osx)
    }

    /// Working directory for new shells, honouring any custom `cwd`
    pub fn get_cwd(&self) -> PathBuf {
        let custom = self
            .env
            .var(ENV_CWD)
            .map(PathBuf::from)
            .or_else(|| self.user.cwd.clone());

        match custom {
            Some(cwd) if cwd.is_absolute() => cwd,
            Some(cwd) => self.get_default_cwd().join(cwd),
            None => self.get_default_cwd(),
        }
    }

    /// Working directory ignoring any custom `cwd`: workspace root, then home
    pub fn get_default_cwd(&self) -> PathBuf {
        if let Some(root) = &self.workspace_root {
            return root.clone();
        }
        self.env
            .var("HOME")
            .or_else(|| self.env.var("USERPROFILE"))
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    pub fn get_transcript_dir(&self) -> Option<PathBuf> {
        self.user.transcript_dir.clone()
    }

    pub fn get_max_instances(&self) -> usize {
        self.user
            .max_instances
            .filter(|n| *n > 0)
            .unwrap_or(MAX_CONCURRENT_INSTANCES)
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            font: self.get_font(),
            cursor_blink: self.get_cursor_blink(),
            right_click_copy_paste: self.get_right_click_copy_paste(),
            scrollback: self.get_scrollback(),
            commands_to_skip_shell: self.get_commands_to_skip_shell(),
        }
    }

    fn default_font_family(&self) -> &'static str {
        match self.platform {
            Platform::Osx => "Menlo, Monaco, 'Courier New', monospace",
            Platform::Windows => "Consolas, 'Courier New', monospace",
            Platform::Linux => "'Droid Sans Mono', 'monospace', monospace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn helper(platform: Platform) -> ConfigHelper {
        ConfigHelper::new()
            .with_platform(platform)
            .with_env(Vec::<(String, String)>::new())
    }

    #[test]
    fn test_shell_falls_back_to_sh_without_environment() {
        assert_eq!(helper(Platform::Linux).get_shell(), "sh");
        assert_eq!(helper(Platform::Windows).get_shell(), "cmd.exe");
    }

    #[test]
    fn test_shell_layering() {
        let mut settings = TerminalSettings::default();
        settings.shell.linux = Some("/usr/bin/zsh".to_string());

        let base = helper(Platform::Linux).with_env([("SHELL", "/bin/bash")]);
        assert_eq!(base.get_shell(), "/bin/bash");

        let with_user = base.clone().with_settings(settings.clone());
        assert_eq!(with_user.get_shell(), "/usr/bin/zsh");

        let with_env = helper(Platform::Linux)
            .with_env([("SHELL", "/bin/bash"), (ENV_SHELL, "/bin/fish")])
            .with_settings(settings);
        assert_eq!(with_env.get_shell(), "/bin/fish");
    }

    #[test]
    fn test_other_platform_override_is_ignored() {
        let mut settings = TerminalSettings::default();
        settings.shell.windows = Some("pwsh.exe".to_string());
        let config = helper(Platform::Linux).with_settings(settings);
        assert_eq!(config.get_shell(), "sh");
    }

    #[test]
    fn test_platform_defaults() {
        let linux = helper(Platform::Linux);
        assert!(!linux.get_right_click_copy_paste());
        assert!(linux.get_shell_args().is_empty());
        assert_eq!(linux.get_scrollback(), DEFAULT_SCROLLBACK_LINES);

        let windows = helper(Platform::Windows);
        assert!(windows.get_right_click_copy_paste());

        let osx = helper(Platform::Osx);
        assert_eq!(osx.get_shell_args(), vec!["-l".to_string()]);
        assert!(osx.get_set_locale_variables());
    }

    #[test]
    fn test_scrollback_env_overrides_user_and_ignores_garbage() {
        let settings = TerminalSettings {
            scrollback: Some(500),
            ..Default::default()
        };
        let config = helper(Platform::Linux)
            .with_settings(settings.clone())
            .with_env([(ENV_SCROLLBACK, "2000")]);
        assert_eq!(config.get_scrollback(), 2000);

        let config = helper(Platform::Linux)
            .with_settings(settings)
            .with_env([(ENV_SCROLLBACK, "lots")]);
        assert_eq!(config.get_scrollback(), 500);
    }

    #[test]
    fn test_cwd_resolution() {
        let config = helper(Platform::Linux).with_workspace_root("/work");
        assert_eq!(config.get_cwd(), PathBuf::from("/work"));

        let settings = TerminalSettings {
            cwd: Some(PathBuf::from("sub/dir")),
            ..Default::default()
        };
        let config = config.with_settings(settings);
        assert_eq!(config.get_cwd(), PathBuf::from("/work/sub/dir"));
        assert_eq!(config.get_default_cwd(), PathBuf::from("/work"));

        let config = helper(Platform::Linux).with_env([("HOME", "/home/me")]);
        assert_eq!(config.get_cwd(), PathBuf::from("/home/me"));
    }

    #[test]
    fn test_settings_from_toml() {
        let settings = TerminalSettings::from_toml_str(
            r#"
            font_size = 16.0
            cursor_blinking = true
            commands_to_skip_shell = ["workbench.action.quickOpen"]

            [shell]
            linux = "/bin/zsh"

            [shell_args]
            linux = ["-i"]
            "#,
        )
        .unwrap();

        let config = helper(Platform::Linux).with_settings(settings);
        assert_eq!(config.get_shell(), "/bin/zsh");
        assert_eq!(config.get_shell_args(), vec!["-i".to_string()]);
        assert!(config.get_cursor_blink());
        assert_eq!(config.get_font().font_size, 16.0);
        assert_eq!(
            config.get_commands_to_skip_shell(),
            vec!["workbench.action.quickOpen".to_string()]
        );
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let err = TerminalSettings::from_toml_str("font_size = \"big\"").unwrap_err();
        assert!(matches!(err, TerminalError::Config(_)));
    }

    #[test]
    fn test_load_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terminal.toml");
        std::fs::write(&path, "scrollback = 250\n").unwrap();
        let settings = TerminalSettings::load(&path).unwrap();
        assert_eq!(settings.scrollback, Some(250));

        std::fs::write(&path, "scrollback = \"lots\"\n").unwrap();
        match TerminalSettings::load(&path).unwrap_err() {
            TerminalError::Config(reason) => assert!(reason.contains("terminal.toml")),
            other => panic!("unexpected error: {other}"),
        }

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            TerminalSettings::load(&missing).unwrap_err(),
            TerminalError::Io(_)
        ));
    }
}
