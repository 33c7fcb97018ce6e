// Terminal multiplexing module
//
// This crate owns a set of shell-backed terminal instances, tracks which one is
// active, and relays their lifecycle events to any number of observers. Rendering
// is left to the presentation layer; only the VT100 screen model is kept here.

pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod launch;
pub mod process;
mod pty_process;
mod registry;
mod screen_buffer;
mod transcript;

// Re-export public API
pub use config::{ConfigHelper, ConfigSnapshot, Platform, TerminalFont, TerminalSettings};
pub use error::{Result, TerminalError};
pub use events::{EventBus, TerminalEvent};
pub use instance::{Clipboard, ConfigChange, InstanceId, InstanceState, TerminalInstance};
pub use launch::{LaunchOptions, ShellLaunchSpec};
pub use process::{
    ProcessEvent, ProcessHandle, ProcessMessage, ProcessSink, ProcessSpawner, ShellProcess, SpawnRequest,
};
pub use pty_process::PtySpawner;
pub use registry::TerminalRegistry;
pub use screen_buffer::ScreenBuffer;

// Constants
pub const MAX_CONCURRENT_INSTANCES: usize = 15;
pub const DEFAULT_SCROLLBACK_LINES: usize = 1000;
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
