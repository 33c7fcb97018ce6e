//! One multiplexed terminal: a shell process plus the state the presentation layer reads.

use serde::Serialize;
use std::path::Path;

use super::config::{ConfigHelper, ConfigSnapshot, Platform};
use super::error::{Result, TerminalError};
use super::launch::{shell_environment, ShellLaunchSpec};
use super::process::{ProcessHandle, ProcessSink, ProcessSpawner, SpawnRequest};
use super::screen_buffer::ScreenBuffer;
use super::transcript::Transcript;

/// Instance ID type. Assigned by the registry, never reused.
pub type InstanceId = u32;

/// Lifecycle of an instance's shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Spawned, waiting for the OS to report a process id
    Starting,
    Running,
    /// Terminal state; only `dispose` still has an effect
    Exited,
}

/// Settings that `update_config` reports as changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Font,
    CursorBlink,
    RightClickCopyPaste,
    Scrollback,
    CommandsToSkipShell,
}

/// System clipboard collaborator used by copy and paste
#[cfg_attr(test, mockall::automock)]
pub trait Clipboard {
    fn write_text(&mut self, text: &str) -> anyhow::Result<()>;

    fn read_text(&mut self) -> anyhow::Result<String>;
}

/// Represents a single terminal instance
pub struct TerminalInstance {
    id: InstanceId,
    name: Option<String>,
    title: String,
    spec: ShellLaunchSpec,
    state: InstanceState,
    process: ProcessHandle,
    screen: ScreenBuffer,
    platform: Platform,
    config: ConfigSnapshot,
    selection: Option<String>,
    has_focus: bool,
    had_focus_on_exit: bool,
    visible: bool,
    scrollback_position: usize,
    exit_code: Option<i32>,
    container: Option<String>,
    transcript: Option<Transcript>,
    disposed: bool,
}

impl std::fmt::Debug for TerminalInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalInstance")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("state", &self.state)
            .field("process", &self.process)
            .field("visible", &self.visible)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl TerminalInstance {
    /// Start the shell described by `spec`. Fails without leaving anything behind.
    pub(crate) fn spawn(
        id: InstanceId,
        name: Option<String>,
        spec: ShellLaunchSpec,
        spawner: &dyn ProcessSpawner,
        config: &ConfigHelper,
        sink: ProcessSink,
        size: (u16, u16),
    ) -> Result<Self> {
        let (cols, rows) = size;
        let request = SpawnRequest {
            spec: &spec,
            cwd: spec.cwd(config),
            env: shell_environment(config),
            cols,
            rows,
        };

        let process = spawner
            .spawn(&request, sink)
            .map_err(|e| TerminalError::spawn(&spec.executable, &e))?;

        let snapshot = config.snapshot();
        let transcript = config
            .get_transcript_dir()
            .and_then(|dir| open_transcript(id, &dir));

        log::info!(
            "Spawned terminal {} ({} {:?}) via {}",
            id,
            spec.executable,
            spec.args,
            spawner.name()
        );

        Ok(Self {
            id,
            title: name.clone().unwrap_or_else(|| spec.executable_name()),
            name,
            spec,
            state: InstanceState::Starting,
            process: ProcessHandle::new(process),
            screen: ScreenBuffer::new(cols, rows, snapshot.scrollback),
            platform: config.platform(),
            config: snapshot,
            selection: None,
            has_focus: false,
            had_focus_on_exit: false,
            visible: false,
            scrollback_position: 0,
            exit_code: None,
            container: None,
            transcript,
            disposed: false,
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// OS process id, once the process has reported it
    pub fn process_id(&self) -> Option<u32> {
        self.process.process_id()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn spec(&self) -> &ShellLaunchSpec {
        &self.spec
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_process_alive(&self) -> bool {
        self.process.is_alive()
    }

    pub fn has_focus(&self) -> bool {
        self.has_focus
    }

    /// Whether the instance had focus when its shell exited
    pub fn had_focus_on_exit(&self) -> bool {
        self.had_focus_on_exit
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Lines scrolled back from the bottom, within `0..=scrollback_depth()`
    pub fn scrollback_position(&self) -> usize {
        self.scrollback_position
    }

    pub fn scrollback_depth(&self) -> usize {
        self.screen.scrollback_lines()
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn commands_to_skip_shell(&self) -> &[String] {
        &self.config.commands_to_skip_shell
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// Terminal size (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        self.screen.size()
    }

    pub fn screen_contents(&self) -> String {
        self.screen.contents()
    }

    /// Cursor position (row, col)
    pub fn cursor_position(&self) -> (u16, u16) {
        self.screen.cursor_position()
    }

    pub fn transcript_path(&self) -> Option<&Path> {
        self.transcript.as_ref().map(|t| t.path())
    }

    /// Write `text` to the shell, optionally followed by the platform line ending.
    /// Text aimed at an exited shell is dropped.
    pub fn send_text(&mut self, text: &str, add_new_line: bool) {
        if !self.is_live() {
            log::debug!("Terminal {} has exited, dropping sent text", self.id);
            return;
        }

        let mut data = String::with_capacity(text.len() + 2);
        data.push_str(text);
        if add_new_line {
            data.push_str(self.platform.line_ending());
        }

        if let Some(transcript) = self.transcript.as_mut() {
            transcript.log_input(&data);
        }
        self.process.write(data.as_bytes());
    }

    /// Take presentation focus. Without `force`, an active selection keeps focus where it is.
    pub fn focus(&mut self, force: bool) -> bool {
        if !self.is_live() {
            return false;
        }
        if !force && self.has_selection() {
            return false;
        }
        self.has_focus = true;
        true
    }

    pub fn blur(&mut self) {
        self.has_focus = false;
    }

    pub fn has_selection(&self) -> bool {
        self.selection.is_some()
    }

    /// Record the selection reported by the presentation layer
    pub fn set_selection(&mut self, selection: Option<String>) {
        if !self.is_live() {
            return;
        }
        self.selection = selection.filter(|text| !text.is_empty());
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Export the selection to the clipboard. Does nothing without a selection.
    pub fn copy_selection(&self, clipboard: &mut dyn Clipboard) -> Result<()> {
        match &self.selection {
            Some(text) => clipboard
                .write_text(text)
                .map_err(|e| TerminalError::Clipboard(format!("{:#}", e))),
            None => Ok(()),
        }
    }

    /// Focus and send the clipboard contents without a trailing newline
    pub fn paste(&mut self, clipboard: &mut dyn Clipboard) -> Result<()> {
        if !self.is_live() {
            return Ok(());
        }
        let text = clipboard
            .read_text()
            .map_err(|e| TerminalError::Clipboard(format!("{:#}", e)))?;
        self.focus(true);
        self.send_text(&text, false);
        Ok(())
    }

    pub fn scroll_up_line(&mut self) {
        self.scroll_to(self.scrollback_position.saturating_add(1));
    }

    pub fn scroll_up_page(&mut self) {
        self.scroll_to(self.scrollback_position.saturating_add(self.page_size()));
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_to(self.scrollback_depth());
    }

    pub fn scroll_down_line(&mut self) {
        self.scroll_to(self.scrollback_position.saturating_sub(1));
    }

    pub fn scroll_down_page(&mut self) {
        self.scroll_to(self.scrollback_position.saturating_sub(self.page_size()));
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_to(0);
    }

    /// Clear the buffer, leaving only the prompt line
    pub fn clear(&mut self) {
        if !self.is_live() {
            return;
        }
        self.screen.clear();
        self.scrollback_position = 0;
    }

    /// Apply a configuration snapshot, returning the settings that changed
    pub fn update_config(&mut self, snapshot: &ConfigSnapshot) -> Vec<ConfigChange> {
        if !self.is_live() {
            return Vec::new();
        }

        let mut changes = Vec::new();
        if self.config.font != snapshot.font {
            changes.push(ConfigChange::Font);
        }
        if self.config.cursor_blink != snapshot.cursor_blink {
            changes.push(ConfigChange::CursorBlink);
        }
        if self.config.right_click_copy_paste != snapshot.right_click_copy_paste {
            changes.push(ConfigChange::RightClickCopyPaste);
        }
        if self.config.scrollback != snapshot.scrollback {
            changes.push(ConfigChange::Scrollback);
            self.screen.set_scrollback_lines(snapshot.scrollback);
            self.scrollback_position = 0;
        }
        if self.config.commands_to_skip_shell != snapshot.commands_to_skip_shell {
            changes.push(ConfigChange::CommandsToSkipShell);
        }

        if !changes.is_empty() {
            log::debug!("Terminal {} applied config changes {:?}", self.id, changes);
            self.config = snapshot.clone();
        }
        changes
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Resize to `width` x `height` cells. Zero dimensions are ignored.
    pub fn layout(&mut self, width: u16, height: u16) {
        if !self.is_live() || width == 0 || height == 0 || self.size() == (width, height) {
            return;
        }
        self.screen.resize(width, height);
        self.scrollback_position = self.screen.scroll_offset();
        self.process.resize(width, height);
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.log_resize(width, height);
        }
    }

    /// Remember the presentation container this instance is shown in
    pub fn attach_to_element(&mut self, container: impl Into<String>) {
        self.container = Some(container.into());
    }

    /// Tear down the instance and kill its shell. Returns false if already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;

        if self.state != InstanceState::Exited {
            self.had_focus_on_exit = self.has_focus;
            self.state = InstanceState::Exited;
        }
        self.process.terminate();
        self.has_focus = false;
        self.selection = None;
        self.visible = false;
        self.container = None;

        if let Some(mut transcript) = self.transcript.take() {
            transcript.log_dispose();
        }
        log::info!("Disposed terminal {}", self.id);
        true
    }

    /// The OS reported the process id. Moves Starting -> Running exactly once.
    pub(crate) fn on_process_ready(&mut self, process_id: u32) -> bool {
        if self.state != InstanceState::Starting || !self.process.set_process_id(process_id) {
            return false;
        }
        self.state = InstanceState::Running;
        true
    }

    /// Feed output to the screen. Returns the new title if the shell changed it.
    pub(crate) fn on_output(&mut self, data: &[u8]) -> Option<String> {
        if self.disposed {
            return None;
        }
        self.screen.process_output(data);
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.log_output(data);
        }

        if self.name.is_some() {
            return None;
        }
        let title = self.screen.title();
        if title.is_empty() || title == self.title {
            return None;
        }
        self.title = title.to_string();
        Some(self.title.clone())
    }

    /// The shell ended on its own. Returns false if the instance had already exited.
    pub(crate) fn on_process_exit(&mut self, exit_code: i32) -> bool {
        if self.state == InstanceState::Exited {
            return false;
        }
        self.state = InstanceState::Exited;
        self.exit_code = Some(exit_code);
        self.had_focus_on_exit = self.has_focus;
        self.process.mark_exited();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.log_exit(exit_code);
        }
        log::info!("Terminal {} shell exited with code {}", self.id, exit_code);
        true
    }

    fn is_live(&self) -> bool {
        self.state != InstanceState::Exited
    }

    fn page_size(&self) -> usize {
        usize::from(self.size().1.max(1))
    }

    fn scroll_to(&mut self, position: usize) {
        if !self.is_live() {
            return;
        }
        self.scrollback_position = self
            .screen
            .set_scroll_offset(position.min(self.scrollback_depth()));
    }
}

impl Drop for TerminalInstance {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn open_transcript(id: InstanceId, dir: &Path) -> Option<Transcript> {
    match Transcript::open(id, dir) {
        Ok(transcript) => Some(transcript),
        Err(e) => {
            log::warn!("Transcript disabled for terminal {}: {:#}", id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalSettings;
    use crate::process::ShellProcess;
    use pretty_assertions::assert_eq;
    use std::sync::{mpsc, Arc, Mutex};

    #[derive(Default)]
    struct Io {
        written: Vec<u8>,
        sizes: Vec<(u16, u16)>,
        killed: bool,
    }

    struct FakeProcess(Arc<Mutex<Io>>);

    impl ShellProcess for FakeProcess {
        fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
            self.0.lock().unwrap().written.extend_from_slice(data);
            Ok(())
        }

        fn resize(&mut self, cols: u16, rows: u16) -> anyhow::Result<()> {
            self.0.lock().unwrap().sizes.push((cols, rows));
            Ok(())
        }

        fn kill(&mut self) -> anyhow::Result<()> {
            self.0.lock().unwrap().killed = true;
            Ok(())
        }
    }

    struct FakeSpawner(Arc<Mutex<Io>>);

    impl ProcessSpawner for FakeSpawner {
        fn spawn(
            &self,
            _request: &SpawnRequest<'_>,
            _sink: ProcessSink,
        ) -> anyhow::Result<Box<dyn ShellProcess>> {
            Ok(Box::new(FakeProcess(Arc::clone(&self.0))))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn spawn_instance(platform: Platform) -> (TerminalInstance, Arc<Mutex<Io>>) {
        let io = Arc::new(Mutex::new(Io::default()));
        let config = ConfigHelper::new()
            .with_platform(platform)
            .with_env([("HOME", "/tmp")])
            .with_settings(TerminalSettings {
                scrollback: Some(100),
                ..Default::default()
            });
        let spec = ShellLaunchSpec::new("/bin/sh", Vec::new());
        let (tx, _rx) = mpsc::channel();
        let instance = TerminalInstance::spawn(
            0,
            None,
            spec,
            &FakeSpawner(Arc::clone(&io)),
            &config,
            ProcessSink::new(0, tx),
            (80, 24),
        )
        .unwrap();
        (instance, io)
    }

    #[test]
    fn test_send_text_line_endings() {
        let (mut unix, unix_io) = spawn_instance(Platform::Linux);
        unix.send_text("echo hi", true);
        unix.send_text("partial", false);
        assert_eq!(unix_io.lock().unwrap().written, b"echo hi\npartial".to_vec());

        let (mut windows, windows_io) = spawn_instance(Platform::Windows);
        windows.send_text("echo hi", true);
        assert_eq!(windows_io.lock().unwrap().written, b"echo hi\r\n".to_vec());
    }

    #[test]
    fn test_send_text_after_exit_is_dropped() {
        let (mut instance, io) = spawn_instance(Platform::Linux);
        assert!(instance.on_process_exit(0));
        instance.send_text("ls", true);
        assert!(io.lock().unwrap().written.is_empty());
    }

    #[test]
    fn test_state_machine() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        assert_eq!(instance.state(), InstanceState::Starting);
        assert_eq!(instance.process_id(), None);

        assert!(instance.on_process_ready(321));
        assert!(!instance.on_process_ready(322));
        assert_eq!(instance.state(), InstanceState::Running);
        assert_eq!(instance.process_id(), Some(321));

        instance.focus(true);
        assert!(instance.on_process_exit(2));
        assert!(!instance.on_process_exit(2));
        assert_eq!(instance.state(), InstanceState::Exited);
        assert_eq!(instance.exit_code(), Some(2));
        assert!(instance.had_focus_on_exit());
        assert!(!instance.is_process_alive());
    }

    #[test]
    fn test_focus_respects_selection_unless_forced() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        instance.set_selection(Some("selected".to_string()));

        assert!(!instance.focus(false));
        assert!(!instance.has_focus());
        assert!(instance.focus(true));
        assert!(instance.has_focus());

        instance.blur();
        instance.clear_selection();
        assert!(instance.focus(false));
    }

    #[test]
    fn test_copy_selection() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);

        let mut clipboard = MockClipboard::new();
        clipboard.expect_write_text().never();
        instance.copy_selection(&mut clipboard).unwrap();

        instance.set_selection(Some("npm test".to_string()));
        let mut clipboard = MockClipboard::new();
        clipboard
            .expect_write_text()
            .withf(|text| text == "npm test")
            .times(1)
            .returning(|_| Ok(()));
        instance.copy_selection(&mut clipboard).unwrap();
    }

    #[test]
    fn test_paste_sends_without_newline_and_focuses() {
        let (mut instance, io) = spawn_instance(Platform::Linux);
        let mut clipboard = MockClipboard::new();
        clipboard
            .expect_read_text()
            .times(1)
            .returning(|| Ok("git status".to_string()));

        instance.paste(&mut clipboard).unwrap();
        assert!(instance.has_focus());
        assert_eq!(io.lock().unwrap().written, b"git status".to_vec());
    }

    #[test]
    fn test_clipboard_failure_is_reported() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        let mut clipboard = MockClipboard::new();
        clipboard
            .expect_read_text()
            .returning(|| Err(anyhow::anyhow!("no display")));

        let err = instance.paste(&mut clipboard).unwrap_err();
        assert!(matches!(err, TerminalError::Clipboard(_)));
    }

    fn fill_history(instance: &mut TerminalInstance, lines: usize) {
        for i in 0..lines {
            instance.on_output(format!("line {}\r\n", i).as_bytes());
        }
    }

    fn first_screen_line(instance: &TerminalInstance) -> String {
        instance
            .screen_contents()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn test_scrolling_without_history_stays_at_bottom() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        instance.scroll_up_line();
        instance.scroll_to_top();
        assert_eq!(instance.scrollback_position(), 0);
        assert_eq!(instance.screen_contents(), "");
    }

    #[test]
    fn test_scrolling_tracks_the_screen() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        // 80 lines on a 24 row screen leave 57 lines of history
        fill_history(&mut instance, 80);
        assert_eq!(first_screen_line(&instance), "line 57");

        instance.scroll_down_line();
        assert_eq!(instance.scrollback_position(), 0);

        instance.scroll_up_line();
        assert_eq!(instance.scrollback_position(), 1);
        assert_eq!(first_screen_line(&instance), "line 56");

        instance.scroll_up_page();
        assert_eq!(instance.scrollback_position(), 24);
        assert_eq!(first_screen_line(&instance), "line 33");

        instance.scroll_to_top();
        assert_eq!(instance.scrollback_position(), 24);
        assert_eq!(first_screen_line(&instance), "line 33");

        instance.scroll_down_line();
        assert_eq!(instance.scrollback_position(), 23);
        assert_eq!(first_screen_line(&instance), "line 34");

        instance.scroll_down_page();
        assert_eq!(instance.scrollback_position(), 0);
        assert_eq!(first_screen_line(&instance), "line 57");

        instance.scroll_to_top();
        instance.scroll_to_bottom();
        assert_eq!(instance.scrollback_position(), 0);
        assert_eq!(first_screen_line(&instance), "line 57");
    }

    #[test]
    fn test_clear_after_scrolling_to_top() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        fill_history(&mut instance, 80);
        instance.on_output(b"$ ");
        instance.scroll_to_top();

        instance.clear();

        assert_eq!(instance.scrollback_position(), 0);
        assert_eq!(instance.screen_contents(), "$");
    }

    #[test]
    fn test_layout_keeps_scroll_within_new_height() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        fill_history(&mut instance, 80);
        instance.scroll_to_top();

        instance.layout(80, 10);

        assert_eq!(instance.scrollback_position(), 10);
        assert!(first_screen_line(&instance).starts_with("line "));
    }

    #[test]
    fn test_clear_resets_scroll_position() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        instance.on_output(b"one\r\ntwo\r\n$ ");
        instance.scroll_up_line();

        instance.clear();

        assert_eq!(instance.scrollback_position(), 0);
        assert_eq!(instance.screen_contents(), "$");
    }

    #[test]
    fn test_update_config_reports_only_changes() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        let mut snapshot = instance.config().clone();
        assert!(instance.update_config(&snapshot).is_empty());

        snapshot.cursor_blink = !snapshot.cursor_blink;
        snapshot.scrollback = 10;
        fill_history(&mut instance, 80);
        instance.scroll_to_top();
        assert_eq!(first_screen_line(&instance), "line 33");

        let changes = instance.update_config(&snapshot);
        assert_eq!(changes, vec![ConfigChange::CursorBlink, ConfigChange::Scrollback]);
        assert_eq!(instance.scrollback_depth(), 10);
        assert_eq!(instance.scrollback_position(), 0);
        assert_eq!(first_screen_line(&instance), "line 57");
    }

    #[test]
    fn test_title_follows_shell_unless_named() {
        let (mut instance, _io) = spawn_instance(Platform::Linux);
        assert_eq!(instance.title(), "sh");
        assert_eq!(instance.on_output(b"\x1b]0;make\x07"), Some("make".to_string()));
        assert_eq!(instance.on_output(b"building"), None);
        assert_eq!(instance.title(), "make");

        let (mut named, _io) = spawn_instance(Platform::Linux);
        named.name = Some("Build".to_string());
        named.title = "Build".to_string();
        assert_eq!(named.on_output(b"\x1b]0;make\x07"), None);
        assert_eq!(named.title(), "Build");
    }

    #[test]
    fn test_layout_resizes_process() {
        let (mut instance, io) = spawn_instance(Platform::Linux);
        instance.layout(120, 40);
        instance.layout(120, 40);
        instance.layout(0, 10);
        assert_eq!(instance.size(), (120, 40));
        assert_eq!(io.lock().unwrap().sizes, vec![(120, 40)]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (mut instance, io) = spawn_instance(Platform::Linux);
        instance.attach_to_element("panel-1");
        instance.set_visible(true);

        assert!(instance.dispose());
        assert!(!instance.dispose());
        assert!(instance.is_disposed());
        assert!(io.lock().unwrap().killed);
        assert_eq!(instance.container(), None);
        assert!(!instance.is_visible());
    }
}
