//! How a shell process is started.

use std::path::{Path, PathBuf};

use super::config::ConfigHelper;

const DEFAULT_LOCALE: &str = "en_US.UTF-8";

/// Caller-facing creation options. Unset fields are resolved from [`ConfigHelper`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub name: Option<String>,
    pub shell_path: Option<String>,
    pub shell_args: Option<Vec<String>>,
    pub wait_on_exit: Option<bool>,
    pub ignore_custom_cwd: Option<bool>,
}

impl LaunchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn shell_path(mut self, path: impl Into<String>) -> Self {
        self.shell_path = Some(path.into());
        self
    }

    pub fn shell_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn wait_on_exit(mut self, wait: bool) -> Self {
        self.wait_on_exit = Some(wait);
        self
    }

    pub fn ignore_custom_cwd(mut self, ignore: bool) -> Self {
        self.ignore_custom_cwd = Some(ignore);
        self
    }
}

/// Fully resolved description of one shell process.
///
/// Built once at creation time and consumed by exactly one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLaunchSpec {
    pub executable: String,
    pub args: Vec<String>,
    /// Start in the default directory even if a custom `cwd` is configured
    pub ignore_custom_cwd: bool,
    /// Keep the instance around in the exited state after the shell ends
    pub wait_on_exit: bool,
}

impl ShellLaunchSpec {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            ignore_custom_cwd: false,
            wait_on_exit: false,
        }
    }

    /// Fill every unset option from configuration.
    ///
    /// Explicit arguments only apply together with an explicit shell path, so a
    /// custom executable never inherits the default shell's arguments.
    pub fn resolve(options: &LaunchOptions, config: &ConfigHelper) -> Self {
        let explicit_shell = options
            .shell_path
            .as_ref()
            .filter(|path| !path.trim().is_empty());

        let (executable, args) = match explicit_shell {
            Some(path) => (path.clone(), options.shell_args.clone().unwrap_or_default()),
            None => (
                config.get_shell(),
                options.shell_args.clone().unwrap_or_else(|| config.get_shell_args()),
            ),
        };

        Self {
            executable,
            args,
            ignore_custom_cwd: options.ignore_custom_cwd.unwrap_or(false),
            wait_on_exit: options.wait_on_exit.unwrap_or(false),
        }
    }

    /// Working directory this spec launches in
    pub fn cwd(&self, config: &ConfigHelper) -> PathBuf {
        if self.ignore_custom_cwd {
            config.get_default_cwd()
        } else {
            config.get_cwd()
        }
    }

    /// File name of the executable, used as the initial title
    pub fn executable_name(&self) -> String {
        Path::new(&self.executable)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.executable.clone())
    }
}

/// Extra environment exported to every shell
pub fn shell_environment(config: &ConfigHelper) -> Vec<(String, String)> {
    let mut env = vec![
        ("TERM".to_string(), "xterm-256color".to_string()),
        ("COLORTERM".to_string(), "truecolor".to_string()),
    ];

    if config.get_set_locale_variables() && config.env_var("LANG").is_none() {
        env.push(("LANG".to_string(), DEFAULT_LOCALE.to_string()));
    }

    env
}
