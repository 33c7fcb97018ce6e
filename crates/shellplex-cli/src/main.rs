use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use shellplex_terminal::{
    ConfigHelper, LaunchOptions, TerminalEvent, TerminalRegistry, TerminalSettings,
};

const PUMP_INTERVAL: Duration = Duration::from_millis(20);

/// Run several shells side by side and report their lifecycle
#[derive(Parser, Debug)]
#[command(name = "shellplex", version, about)]
struct Cli {
    /// TOML file with terminal setting overrides
    #[arg(short, long, env = "SHELLPLEX_CONFIG")]
    config: Option<PathBuf>,

    /// Shell executable (defaults to the configured platform shell)
    #[arg(short, long)]
    shell: Option<String>,

    /// Argument passed to the shell, repeatable
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Number of terminal instances to start
    #[arg(short = 'n', long, default_value_t = 2)]
    count: usize,

    /// Keep instances around after their shell exits
    #[arg(long)]
    wait_on_exit: bool,

    /// Command sent to every instance, repeatable
    #[arg(short, long = "run")]
    run: Vec<String>,

    /// How long to collect output before printing screens
    #[arg(long, default_value_t = 1500)]
    duration_ms: u64,

    /// Directory shells start in unless a custom cwd is configured
    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => TerminalSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => TerminalSettings::default(),
    };
    let mut config = ConfigHelper::new().with_settings(settings);
    if let Some(root) = &cli.workspace {
        config = config.with_workspace_root(root);
    }

    let mut registry = TerminalRegistry::new(config);
    let printer = tokio::spawn(print_events(registry.subscribe()));

    for _ in 0..cli.count {
        let mut options = LaunchOptions::new().wait_on_exit(cli.wait_on_exit);
        if let Some(shell) = &cli.shell {
            options = options.shell_path(shell).shell_args(cli.args.iter().cloned());
        }
        let instance = registry
            .create_instance(options)
            .context("Failed to start terminal")?;
        log::info!("Started terminal {} ({})", instance.id(), instance.title());
    }
    registry.set_panel_visible(true);

    for id in registry.instance_ids().to_vec() {
        let instance = registry.instance_mut(id)?;
        for command in &cli.run {
            instance.send_text(command, true);
        }
    }

    // Walk the focus through every instance and back
    for _ in 0..registry.instance_count() {
        registry.set_active_instance_to_next();
    }

    let deadline = Instant::now() + Duration::from_millis(cli.duration_ms);
    while Instant::now() < deadline {
        registry.process_pending();
        tokio::time::sleep(PUMP_INTERVAL).await;
    }
    registry.process_pending();

    let labels = registry.get_instance_labels();
    for (label, instance) in labels.iter().zip(registry.instances()) {
        let marker = if registry.active_id() == Some(instance.id()) { "*" } else { " " };
        println!("{} {} [{:?}]", marker, label.bold(), instance.state());
        println!("{}", instance.screen_contents().trim_end());
        println!();
    }

    drop(registry);
    printer.await.context("Event printer failed")?;
    Ok(())
}

async fn print_events(mut events: UnboundedReceiver<TerminalEvent>) {
    while let Some(event) = events.recv().await {
        let line = match &event {
            TerminalEvent::ActiveInstanceChanged { id: Some(id) } => {
                format!("active terminal is now {}", id).cyan()
            }
            TerminalEvent::ActiveInstanceChanged { id: None } => "no active terminal".cyan(),
            TerminalEvent::InstanceDisposed { id } => format!("terminal {} disposed", id).yellow(),
            TerminalEvent::InstanceProcessIdReady { id, process_id } => {
                format!("terminal {} running as pid {}", id, process_id).green()
            }
            TerminalEvent::InstancesChanged => continue,
            TerminalEvent::InstanceTitleChanged { id, title } => {
                format!("terminal {} title: {}", id, title).normal()
            }
            TerminalEvent::InstanceExited { id, exit_code } => {
                format!("terminal {} exited with code {}", id, exit_code).red()
            }
        };
        eprintln!("{} {}", "▸".dimmed(), line);
    }
}
