//! ANSI/VT escape sequence parser using the VTE crate.
//!
//! Only what a REPL console needs is interpreted: printing, line control,
//! cursor movement and erasure. Colors and attributes are consumed and
//! dropped since link scanning and cursor reporting only look at text.

use vte::{Params, Perform};

use julia_console_core::Position;

use crate::grid::Grid;

/// ANSI parser wrapping the VTE state machine.
///
/// The state machine persists between calls so escape sequences split
/// across pty reads are decoded correctly.
pub struct Parser {
    state: vte::Parser,
    grid: Grid,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("grid", &self.grid)
            .finish_non_exhaustive()
    }
}

impl Parser {
    /// Create a new parser with the given grid.
    pub fn new(grid: Grid) -> Self {
        Self {
            state: vte::Parser::new(),
            grid,
        }
    }

    /// Get a reference to the grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Get a mutable reference to the grid.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    /// Process bytes through the VTE parser.
    ///
    /// Returns the number of bytes consumed.
    pub fn process(&mut self, bytes: &[u8]) -> usize {
        for byte in bytes {
            self.state.advance(&mut self.grid, *byte);
        }
        bytes.len()
    }
}

fn first_param(params: &Params, default: u16) -> u16 {
    params
        .iter()
        .next()
        .map(|p| p[0])
        .filter(|n| *n != 0)
        .unwrap_or(default)
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        self.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // Backspace (BS)
            0x08 => {
                let cursor = self.cursor_mut();
                cursor.position.col = cursor.position.col.saturating_sub(1);
            }

            // Horizontal Tab (HT)
            0x09 => {
                let cols = self.dimensions().cols;
                let cursor = self.cursor_mut();
                let next_tab = ((cursor.position.col / 8) + 1) * 8;
                cursor.position.col = next_tab.min(cols.saturating_sub(1));
            }

            // Line Feed (LF), Vertical Tab, Form Feed
            0x0A..=0x0C => self.line_feed(),

            // Carriage Return (CR)
            0x0D => self.carriage_return(),

            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _c: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, c: char) {
        // Private modes (e.g. `?25l`, bracketed paste) carry no text
        if !intermediates.is_empty() {
            return;
        }

        let dims = self.dimensions();
        let max_row = dims.rows.saturating_sub(1);
        let max_col = dims.cols.saturating_sub(1);

        match c {
            // Cursor Up (CUU)
            'A' => {
                let n = first_param(params, 1);
                let cursor = self.cursor_mut();
                cursor.position.row = cursor.position.row.saturating_sub(n);
            }

            // Cursor Down (CUD)
            'B' => {
                let n = first_param(params, 1);
                let cursor = self.cursor_mut();
                cursor.position.row = cursor.position.row.saturating_add(n).min(max_row);
            }

            // Cursor Forward (CUF)
            'C' => {
                let n = first_param(params, 1);
                let cursor = self.cursor_mut();
                cursor.position.col = cursor.position.col.saturating_add(n).min(max_col);
            }

            // Cursor Backward (CUB)
            'D' => {
                let n = first_param(params, 1);
                let cursor = self.cursor_mut();
                cursor.position.col = cursor.position.col.saturating_sub(n);
            }

            // Cursor Horizontal Absolute (CHA)
            'G' => {
                let col = first_param(params, 1) - 1;
                self.cursor_mut().position.col = col.min(max_col);
            }

            // Cursor Position (CUP)
            'H' | 'f' => {
                let mut iter = params.iter();
                let row = iter.next().map(|p| p[0]).unwrap_or(1).saturating_sub(1);
                let col = iter.next().map(|p| p[0]).unwrap_or(1).saturating_sub(1);
                self.cursor_mut().position = Position::new(row.min(max_row), col.min(max_col));
            }

            // Erase in Display (ED)
            'J' => {
                let mode = params.iter().next().map(|p| p[0]).unwrap_or(0);
                let Position { row, col } = self.cursor().position;
                match mode {
                    0 => {
                        self.erase_in_row(row, col, dims.cols);
                        self.erase_rows(row + 1, dims.rows);
                    }
                    1 => {
                        self.erase_rows(0, row);
                        self.erase_in_row(row, 0, col + 1);
                    }
                    2 | 3 => self.erase_rows(0, dims.rows),
                    _ => {}
                }
            }

            // Erase in Line (EL)
            'K' => {
                let mode = params.iter().next().map(|p| p[0]).unwrap_or(0);
                let Position { row, col } = self.cursor().position;
                match mode {
                    0 => self.erase_in_row(row, col, dims.cols),
                    1 => self.erase_in_row(row, 0, col + 1),
                    2 => self.erase_in_row(row, 0, dims.cols),
                    _ => {}
                }
            }

            // Save Cursor Position (SCP)
            's' => self.save_cursor(),

            // Restore Cursor Position (RCP)
            'u' => self.restore_cursor(),

            // SGR and everything else leave the text untouched
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        match byte {
            // DECSC / DECRC
            b'7' => self.save_cursor(),
            b'8' => self.restore_cursor(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use julia_console_core::Dimensions;

    fn parser(rows: u16, cols: u16) -> Parser {
        Parser::new(Grid::new(Dimensions::new(rows, cols), 100))
    }

    #[test]
    fn test_parser_process_basic() {
        let mut parser = parser(24, 80);
        let bytes = b"Hello, World!";
        assert_eq!(parser.process(bytes), bytes.len());
        assert_eq!(parser.grid().row_text(0).unwrap(), "Hello, World!");
        assert_eq!(parser.grid().cursor().position.col, 13);
    }

    #[test]
    fn test_sgr_is_dropped() {
        let mut parser = parser(24, 80);
        parser.process(b"\x1b[1m\x1b[32mPress Enter to start Julia. \x1b[0m\n\r");
        assert_eq!(parser.grid().row_text(0).unwrap(), "Press Enter to start Julia.");
        assert_eq!(parser.grid().cursor().position, Position::new(1, 0));
    }

    #[test]
    fn test_sequence_split_across_reads() {
        let mut parser = parser(24, 80);
        parser.process(b"ab\x1b[");
        parser.process(b"31mcd");
        assert_eq!(parser.grid().row_text(0).unwrap(), "abcd");
    }

    #[test]
    fn test_parser_execute_controls() {
        let mut parser = parser(24, 80);
        parser.process(b"abc\x08");
        assert_eq!(parser.grid().cursor().position.col, 2);
        parser.process(b"\t");
        assert_eq!(parser.grid().cursor().position.col, 8);
        parser.process(b"\r\n");
        assert_eq!(parser.grid().cursor().position, Position::new(1, 0));
    }

    #[test]
    fn test_parser_csi_cursor_movement() {
        let mut parser = parser(24, 80);
        parser.process(b"\x1b[11;21H");
        assert_eq!(parser.grid().cursor().position, Position::new(10, 20));

        parser.process(b"\x1b[5A");
        assert_eq!(parser.grid().cursor().position.row, 5);

        parser.process(b"\x1b[100B");
        assert_eq!(parser.grid().cursor().position.row, 23);

        parser.process(b"\x1b[3G");
        assert_eq!(parser.grid().cursor().position.col, 2);
    }

    #[test]
    fn test_parser_erase_in_line() {
        let mut parser = parser(5, 10);
        parser.process(b"0123456789\x1b[1;6H\x1b[K");
        assert_eq!(parser.grid().row_text(0).unwrap(), "01234");
    }

    #[test]
    fn test_parser_erase_in_display() {
        let mut parser = parser(3, 10);
        parser.process(b"aaa\r\nbbb\r\nccc\x1b[2;2H\x1b[J");
        assert_eq!(parser.grid().row_text(0).unwrap(), "aaa");
        assert_eq!(parser.grid().row_text(1).unwrap(), "b");
        assert_eq!(parser.grid().row_text(2).unwrap(), "");
    }

    #[test]
    fn test_private_modes_ignored() {
        let mut parser = parser(5, 10);
        parser.process(b"x\x1b[?25l\x1b[?2004hy");
        assert_eq!(parser.grid().row_text(0).unwrap(), "xy");
    }
}
