//! Terminal grid state buffer, cursor tracking and scrollback.

use std::collections::VecDeque;

use julia_console_core::{CursorStyle, Dimensions, Position};

/// Cursor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Current position
    pub position: Position,
    /// Visibility
    pub visible: bool,
    /// Cursor style
    pub style: CursorStyle,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            position: Position::origin(),
            visible: true,
            style: CursorStyle::Block,
        }
    }
}

/// Visible screen plus the lines that scrolled off its top.
#[derive(Debug)]
pub struct Grid {
    /// Visible rows, each exactly `dimensions.cols` wide
    rows: Vec<Vec<char>>,
    /// Grid dimensions
    dimensions: Dimensions,
    /// Cursor state
    cursor: Cursor,
    /// Saved cursor (for save/restore operations)
    saved_cursor: Option<Cursor>,
    /// Set after printing into the last column; the next print wraps first
    wrap_pending: bool,
    /// Lines scrolled off the top, oldest first
    scrollback: VecDeque<String>,
    /// Maximum scrollback lines kept
    scrollback_limit: usize,
}

impl Grid {
    /// Create a new grid with the given dimensions and scrollback size.
    pub fn new(dimensions: Dimensions, scrollback_limit: usize) -> Self {
        Self {
            rows: vec![blank_row(dimensions.cols); dimensions.rows as usize],
            dimensions,
            cursor: Cursor::default(),
            saved_cursor: None,
            wrap_pending: false,
            scrollback: VecDeque::new(),
            scrollback_limit,
        }
    }

    /// Get dimensions.
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Get cursor reference.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Get mutable cursor reference.
    pub fn cursor_mut(&mut self) -> &mut Cursor {
        self.wrap_pending = false;
        &mut self.cursor
    }

    /// Character at a visible position.
    pub fn char_at(&self, row: u16, col: u16) -> Option<char> {
        self.rows
            .get(row as usize)
            .and_then(|r| r.get(col as usize))
            .copied()
    }

    /// Text of a visible row with trailing blanks trimmed.
    pub fn row_text(&self, row: u16) -> Option<String> {
        self.rows.get(row as usize).map(|cells| {
            let text: String = cells.iter().collect();
            text.trim_end().to_string()
        })
    }

    /// Text of every visible row.
    pub fn visible_lines(&self) -> Vec<String> {
        (0..self.dimensions.rows)
            .filter_map(|row| self.row_text(row))
            .collect()
    }

    /// Lines that scrolled off the top, oldest first.
    pub fn scrollback(&self) -> impl Iterator<Item = &str> {
        self.scrollback.iter().map(String::as_str)
    }

    /// Scrollback followed by the visible screen, trailing blank rows dropped.
    pub fn to_plain_text(&self) -> String {
        let mut lines: Vec<String> = self.scrollback.iter().cloned().collect();
        lines.extend(self.visible_lines());
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// Put a character at the cursor and advance, wrapping at the right edge.
    pub fn put_char(&mut self, c: char) {
        if self.wrap_pending {
            self.wrap_pending = false;
            self.cursor.position.col = 0;
            self.line_feed();
        }

        let Position { row, col } = self.cursor.position;
        if let Some(cell) = self
            .rows
            .get_mut(row as usize)
            .and_then(|r| r.get_mut(col as usize))
        {
            *cell = c;
        }

        if col + 1 >= self.dimensions.cols {
            self.wrap_pending = true;
        } else {
            self.cursor.position.col = col + 1;
        }
    }

    /// Move down one row, scrolling the screen at the bottom edge.
    pub fn line_feed(&mut self) {
        self.wrap_pending = false;
        if self.cursor.position.row + 1 >= self.dimensions.rows {
            self.scroll_up();
        } else {
            self.cursor.position.row += 1;
        }
    }

    /// Return to column 0.
    pub fn carriage_return(&mut self) {
        self.wrap_pending = false;
        self.cursor.position.col = 0;
    }

    fn scroll_up(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let top = self.rows.remove(0);
        self.rows.push(blank_row(self.dimensions.cols));
        self.push_scrollback(top.iter().collect::<String>().trim_end().to_string());
    }

    fn push_scrollback(&mut self, line: String) {
        self.scrollback.push_back(line);
        while self.scrollback.len() > self.scrollback_limit {
            self.scrollback.pop_front();
        }
    }

    /// Blank cells in `row` from `from` to `to` (exclusive, clamped).
    pub fn erase_in_row(&mut self, row: u16, from: u16, to: u16) {
        if let Some(cells) = self.rows.get_mut(row as usize) {
            let to = (to as usize).min(cells.len());
            for cell in cells.iter_mut().take(to).skip(from as usize) {
                *cell = ' ';
            }
        }
    }

    /// Blank every visible row in `from..to`.
    pub fn erase_rows(&mut self, from: u16, to: u16) {
        for row in from..to.min(self.dimensions.rows) {
            self.erase_in_row(row, 0, self.dimensions.cols);
        }
    }

    /// Save current cursor state.
    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some(self.cursor.clone());
    }

    /// Restore saved cursor state.
    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.saved_cursor.take() {
            self.cursor = saved;
            self.wrap_pending = false;
        }
    }

    /// Drop scrollback and all rows except the cursor row, which moves to the top.
    pub fn clear(&mut self) {
        let row = self.cursor.position.row as usize;
        let current = self
            .rows
            .get(row)
            .cloned()
            .unwrap_or_else(|| blank_row(self.dimensions.cols));
        self.rows = vec![blank_row(self.dimensions.cols); self.dimensions.rows as usize];
        if let Some(first) = self.rows.first_mut() {
            *first = current;
        }
        self.cursor.position.row = 0;
        self.scrollback.clear();
    }

    /// Resize grid, preserving content where possible.
    ///
    /// Content from the top-left corner is preserved up to the smaller of
    /// old and new dimensions. Cursor is clamped to new bounds.
    pub fn resize(&mut self, new_dimensions: Dimensions) {
        let mut rows = vec![blank_row(new_dimensions.cols); new_dimensions.rows as usize];
        for (new_row, old_row) in rows.iter_mut().zip(self.rows.iter()) {
            for (new_cell, old_cell) in new_row.iter_mut().zip(old_row.iter()) {
                *new_cell = *old_cell;
            }
        }

        self.rows = rows;
        self.dimensions = new_dimensions;
        self.wrap_pending = false;

        if new_dimensions.rows > 0 {
            self.cursor.position.row = self.cursor.position.row.min(new_dimensions.rows - 1);
        }
        if new_dimensions.cols > 0 {
            self.cursor.position.col = self.cursor.position.col.min(new_dimensions.cols - 1);
        }
    }
}

fn blank_row(cols: u16) -> Vec<char> {
    vec![' '; cols as usize]
}
