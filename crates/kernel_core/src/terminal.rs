use hal::{Cursor, PhysAddr, VirtAddr};

use crate::layout::{terminal_page, SCREEN_ALIAS, TERMINAL_COUNT, VIDEO_MEMORY};
use crate::process::{Frame, Pid};

/// Scheduling and display state of one virtual terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Terminal {
    /// Innermost process of the terminal's process chain.
    pub running: Option<Pid>,
    /// Set once the root shell has been launched.
    pub started: bool,
    pub cursor: Cursor,
    /// Kernel context the root shell returns to when relaunched.
    pub entry: Option<Frame>,
}

#[derive(Debug)]
pub struct TerminalRegistry {
    terminals: [Terminal; TERMINAL_COUNT],
    active: usize,
    visible: usize,
}

impl Default for TerminalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalRegistry {
    pub const fn new() -> Self {
        const IDLE: Terminal = Terminal {
            running: None,
            started: false,
            cursor: Cursor { x: 0, y: 0 },
            entry: None,
        };
        Self {
            terminals: [IDLE; TERMINAL_COUNT],
            active: 0,
            visible: 0,
        }
    }

    /// Terminal currently receiving CPU time.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Terminal currently shown on the physical screen.
    pub fn visible(&self) -> usize {
        self.visible
    }

    pub fn set_active(&mut self, terminal: usize) {
        if terminal < TERMINAL_COUNT {
            self.active = terminal;
        }
    }

    pub fn set_visible(&mut self, terminal: usize) {
        if terminal < TERMINAL_COUNT {
            self.visible = terminal;
        }
    }

    /// Moves the active terminal forward round-robin and returns it.
    pub fn advance(&mut self) -> usize {
        self.active = (self.active + 1) % TERMINAL_COUNT;
        self.active
    }

    pub fn get(&self, terminal: usize) -> Option<&Terminal> {
        self.terminals.get(terminal)
    }

    pub fn get_mut(&mut self, terminal: usize) -> Option<&mut Terminal> {
        self.terminals.get_mut(terminal)
    }

    pub fn current(&self) -> &Terminal {
        &self.terminals[self.active]
    }

    pub fn current_mut(&mut self) -> &mut Terminal {
        &mut self.terminals[self.active]
    }

    /// Physical page a terminal draws into: the screen if visible, its
    /// backing page otherwise.
    pub fn display_page(&self, terminal: usize) -> PhysAddr {
        if terminal == self.visible {
            VIDEO_MEMORY
        } else {
            terminal_page(terminal)
        }
    }

    /// Kernel-virtual page the console draws a terminal's text into.
    pub fn text_page(&self, terminal: usize) -> VirtAddr {
        if terminal == self.visible {
            SCREEN_ALIAS
        } else {
            terminal_page(terminal)
        }
    }
}
