use vt100::Parser;

/// Terminal screen state buffer
pub struct ScreenBuffer {
    parser: Parser,
    scrollback_lines: usize,
    cols: u16,
    rows: u16,
}

impl std::fmt::Debug for ScreenBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenBuffer")
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("scrollback_lines", &self.scrollback_lines)
            .finish()
    }
}

impl ScreenBuffer {
    /// Create a new screen buffer
    pub fn new(cols: u16, rows: u16, scrollback_lines: usize) -> Self {
        Self {
            parser: Parser::new(rows, cols, scrollback_lines),
            scrollback_lines,
            cols,
            rows,
        }
    }

    /// Feed process output to the VT100 parser
    pub fn process_output(&mut self, data: &[u8]) {
        self.parser.process(data);
    }

    /// Visible screen contents as plain text
    pub fn contents(&self) -> String {
        self.parser.screen().contents()
    }

    /// Cursor position (row, col)
    pub fn cursor_position(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    /// Window title set by the shell through OSC 0/2
    pub fn title(&self) -> &str {
        self.parser.screen().title()
    }

    /// Get terminal size (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// History depth the parser retains
    pub fn scrollback_lines(&self) -> usize {
        self.scrollback_lines
    }

    /// Resize the screen, keeping its contents and as much of the scroll offset as fits
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let offset = self.scroll_offset();
        self.parser.set_scrollback(0);
        self.cols = cols;
        self.rows = rows;
        self.parser.set_size(rows, cols);
        self.set_scroll_offset(offset);
    }

    /// Change the scrollback depth. The live screen is replayed into the new parser,
    /// which starts at the bottom; history beyond the screen is discarded.
    pub fn set_scrollback_lines(&mut self, lines: usize) {
        if lines == self.scrollback_lines {
            return;
        }
        self.parser.set_scrollback(0);
        let visible = self.parser.screen().contents_formatted();
        self.scrollback_lines = lines;
        self.parser = Parser::new(self.rows, self.cols, lines);
        self.parser.process(&visible);
    }

    /// Move the viewport `offset` lines into history. Returns the offset actually applied,
    /// which is limited by the retained history and by the screen height.
    pub fn set_scroll_offset(&mut self, offset: usize) -> usize {
        // vt100 cannot page back further than one screen height
        self.parser.set_scrollback(offset.min(usize::from(self.rows)));
        self.parser.screen().scrollback()
    }

    /// Lines the viewport currently sits above the bottom
    pub fn scroll_offset(&self) -> usize {
        self.parser.screen().scrollback()
    }

    /// Drop everything except the line the cursor is on, which moves to the top
    pub fn clear(&mut self) {
        self.parser.set_scrollback(0);
        let (row, col) = self.cursor_position();
        let prompt = self
            .parser
            .screen()
            .rows_formatted(0, self.cols)
            .nth(row as usize)
            .unwrap_or_default();

        self.parser = Parser::new(self.rows, self.cols, self.scrollback_lines);
        self.parser.process(&prompt);
        self.parser
            .process(format!("\x1b[1;{}H", col + 1).as_bytes());
    }
}
