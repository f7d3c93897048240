/// Capacity of one terminal's input line, newline included.
pub const LINE_CAPACITY: usize = 128;

const BACKSPACE: u8 = 0x08;

/// Line discipline for one terminal: characters accumulate until Enter,
/// which publishes the line (newline included) for the next reader.
#[derive(Debug, Clone, Copy)]
pub struct LineBuffer {
    pending: [u8; LINE_CAPACITY],
    pending_len: usize,
    ready: [u8; LINE_CAPACITY],
    ready_len: Option<usize>,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            pending: [0; LINE_CAPACITY],
            pending_len: 0,
            ready: [0; LINE_CAPACITY],
            ready_len: None,
        }
    }

    /// Feeds one typed byte and returns the byte to echo, if any.
    pub fn push(&mut self, byte: u8) -> Option<u8> {
        match byte {
            BACKSPACE => {
                if self.pending_len == 0 {
                    return None;
                }
                self.pending_len -= 1;
                Some(BACKSPACE)
            }
            b'\n' => {
                let len = self.pending_len;
                self.ready[..len].copy_from_slice(&self.pending[..len]);
                self.ready[len] = b'\n';
                // An unread line is replaced by the newer one.
                self.ready_len = Some(len + 1);
                self.pending_len = 0;
                Some(b'\n')
            }
            byte => {
                // Keep one slot for the newline.
                if self.pending_len >= LINE_CAPACITY - 1 {
                    return None;
                }
                self.pending[self.pending_len] = byte;
                self.pending_len += 1;
                Some(byte)
            }
        }
    }

    /// Moves the completed line into `buf`, truncating if `buf` is short.
    pub fn take_line(&mut self, buf: &mut [u8]) -> Option<usize> {
        let len = self.ready_len.take()?;
        let n = len.min(buf.len());
        buf[..n].copy_from_slice(&self.ready[..n]);
        Some(n)
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
