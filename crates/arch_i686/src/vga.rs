use core::ptr::{read_volatile, write_volatile};

use hal::Cursor;

use crate::port::Port;

pub const VGA_WIDTH: usize = 80;
pub const VGA_HEIGHT: usize = 25;
pub const VGA_CELLS: usize = VGA_WIDTH * VGA_HEIGHT;
const DEFAULT_COLOR: u8 = 0x07;
const CRTC_INDEX: u16 = 0x3D4;
const CRTC_DATA: u16 = 0x3D5;

/// Moves the hardware cursor of the physical screen.
pub fn set_hardware_cursor(cursor: Cursor) {
    let pos = usize::from(cursor.y) * VGA_WIDTH + usize::from(cursor.x);
    unsafe {
        Port::new(CRTC_INDEX).write(0x0F);
        Port::new(CRTC_DATA).write((pos & 0xFF) as u8);
        Port::new(CRTC_INDEX).write(0x0E);
        Port::new(CRTC_DATA).write(((pos >> 8) & 0xFF) as u8);
    }
}

/// A text-mode page of 80x25 character cells, wherever it lives.
pub struct TextScreen {
    cells: *mut u16,
    row: usize,
    column: usize,
    color: u8,
}

impl TextScreen {
    /// # Safety
    /// `cells` must point at `VGA_CELLS` writable cells for the screen's
    /// lifetime.
    pub unsafe fn new(cells: *mut u16, cursor: Cursor) -> Self {
        Self {
            cells,
            row: usize::from(cursor.y).min(VGA_HEIGHT - 1),
            column: usize::from(cursor.x).min(VGA_WIDTH),
            color: DEFAULT_COLOR,
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            x: self.column as u16,
            y: self.row as u16,
        }
    }

    pub fn clear(&mut self) {
        for row in 0..VGA_HEIGHT {
            self.clear_row(row);
        }
        self.row = 0;
        self.column = 0;
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(byte);
        }
    }

    fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            b'\r' => {}
            0x08 => self.backspace(),
            byte => {
                if self.column >= VGA_WIDTH {
                    self.new_line();
                }
                self.write_cell(self.row, self.column, byte);
                self.column += 1;
            }
        }
    }

    fn new_line(&mut self) {
        self.column = 0;
        if self.row + 1 >= VGA_HEIGHT {
            self.scroll();
        } else {
            self.row += 1;
        }
    }

    fn backspace(&mut self) {
        if self.column == 0 {
            if self.row == 0 {
                return;
            }
            self.row -= 1;
            self.column = VGA_WIDTH - 1;
        } else {
            self.column -= 1;
        }
        self.write_cell(self.row, self.column, b' ');
    }

    fn scroll(&mut self) {
        for row in 1..VGA_HEIGHT {
            for col in 0..VGA_WIDTH {
                let cell = self.read_cell(row, col);
                self.write_raw(row - 1, col, cell);
            }
        }
        self.clear_row(VGA_HEIGHT - 1);
    }

    fn clear_row(&self, row: usize) {
        for col in 0..VGA_WIDTH {
            self.write_cell(row, col, b' ');
        }
    }

    fn write_cell(&self, row: usize, col: usize, byte: u8) {
        self.write_raw(row, col, (u16::from(self.color) << 8) | u16::from(byte));
    }

    fn write_raw(&self, row: usize, col: usize, cell: u16) {
        unsafe { write_volatile(self.cells.add(row * VGA_WIDTH + col), cell) }
    }

    fn read_cell(&self, row: usize, col: usize) -> u16 {
        unsafe { read_volatile(self.cells.add(row * VGA_WIDTH + col)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(cells: &[u16], row: usize) -> String {
        cells[row * VGA_WIDTH..(row + 1) * VGA_WIDTH]
            .iter()
            .map(|cell| (cell & 0xFF) as u8 as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    fn blank() -> Vec<u16> {
        vec![0x0720; VGA_CELLS]
    }

    fn screen(cells: &mut [u16], cursor: Cursor) -> TextScreen {
        assert_eq!(cells.len(), VGA_CELLS);
        unsafe { TextScreen::new(cells.as_mut_ptr(), cursor) }
    }

    #[test]
    fn writes_at_cursor_and_reports_position() {
        let mut cells = blank();
        let mut out = screen(&mut cells, Cursor { x: 3, y: 1 });
        out.write_bytes(b"hi\nok");
        assert_eq!(out.cursor(), Cursor { x: 2, y: 2 });
        assert_eq!(text(&cells, 1), "   hi");
        assert_eq!(text(&cells, 2), "ok");
        assert_eq!(cells[VGA_WIDTH + 3] >> 8, u16::from(DEFAULT_COLOR));
    }

    #[test]
    fn long_lines_wrap() {
        let mut cells = blank();
        let mut out = screen(&mut cells, Cursor::default());
        out.write_bytes(&[b'x'; VGA_WIDTH + 1]);
        assert_eq!(out.cursor(), Cursor { x: 1, y: 1 });
        assert_eq!(text(&cells, 1), "x");
    }

    #[test]
    fn bottom_line_scrolls() {
        let mut cells = blank();
        let mut out = screen(
            &mut cells,
            Cursor {
                x: 0,
                y: (VGA_HEIGHT - 1) as u16,
            },
        );
        out.write_bytes(b"last\nnext");
        assert_eq!(out.cursor(), Cursor { x: 4, y: (VGA_HEIGHT - 1) as u16 });
        assert_eq!(text(&cells, VGA_HEIGHT - 2), "last");
        assert_eq!(text(&cells, VGA_HEIGHT - 1), "next");
    }

    #[test]
    fn backspace_erases_previous_cell() {
        let mut cells = blank();
        let mut out = screen(&mut cells, Cursor::default());
        out.write_bytes(b"ab\x08");
        assert_eq!(out.cursor(), Cursor { x: 1, y: 0 });
        assert_eq!(text(&cells, 0), "a");
    }
}
