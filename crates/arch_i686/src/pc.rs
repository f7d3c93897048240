use core::ptr::{copy_nonoverlapping, NonNull};

use hal::{
    Console, Cursor, Display, Errno, PagingOps, PagingRoot, Rtc, TaskSegment, UserMemory,
    VirtAddr,
};

use crate::input::LineBuffer;
use crate::vga::{set_hardware_cursor, TextScreen};
use crate::{cpu, gdt, rtc};

/// One console per virtual terminal.
pub const TERMINALS: usize = 3;

const PAGE_BYTES: usize = 4096;

/// The PC platform: the CPU's paging and task segment plus the text-mode
/// consoles, keyboard lines and CMOS clock behind the `hal` contracts.
pub struct Pc {
    cursors: [Cursor; TERMINALS],
    lines: [LineBuffer; TERMINALS],
}

impl Pc {
    pub const fn new() -> Self {
        Self {
            cursors: [Cursor { x: 0, y: 0 }; TERMINALS],
            lines: [LineBuffer::new(); TERMINALS],
        }
    }

    /// Feeds a typed byte into `terminal`'s line and returns what to echo.
    pub fn key_input(&mut self, terminal: usize, byte: u8) -> Option<u8> {
        self.lines.get_mut(terminal)?.push(byte)
    }
}

impl Default for Pc {
    fn default() -> Self {
        Self::new()
    }
}

/// Blanks the text page at `page`.
///
/// # Safety
/// `page` must be a mapped, writable 4 KB page.
pub unsafe fn clear_text_page(page: u32) {
    let mut screen = TextScreen::new(page as *mut u16, Cursor::default());
    screen.clear();
}

impl PagingOps for Pc {
    fn load_root(&self, root: PagingRoot) {
        unsafe { cpu::load_page_directory(root) }
    }

    fn flush_tlb(&self) {
        cpu::flush_tlb();
    }
}

impl TaskSegment for Pc {
    fn kernel_stack(&self) -> VirtAddr {
        gdt::kernel_stack()
    }

    fn set_kernel_stack(&mut self, top: VirtAddr) {
        gdt::set_kernel_stack(top);
    }
}

impl Display for Pc {
    fn set_cursor(&mut self, cursor: Cursor) {
        set_hardware_cursor(cursor);
    }

    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) {
        if dst == src {
            return;
        }
        unsafe { copy_nonoverlapping(src as *const u8, dst as *mut u8, PAGE_BYTES) }
    }
}

impl Console for Pc {
    fn write(&mut self, terminal: usize, screen: VirtAddr, bytes: &[u8]) -> Cursor {
        let Some(cursor) = self.cursors.get_mut(terminal) else {
            return Cursor::default();
        };
        let mut text = unsafe { TextScreen::new(screen as *mut u16, *cursor) };
        text.write_bytes(bytes);
        *cursor = text.cursor();
        *cursor
    }

    fn poll_line(&mut self, terminal: usize, buf: &mut [u8]) -> Option<usize> {
        self.lines.get_mut(terminal)?.take_line(buf)
    }
}

impl Rtc for Pc {
    fn open(&mut self) {
        rtc::rtc_open();
    }

    fn poll_tick(&mut self) -> bool {
        rtc::rtc_take_tick()
    }

    fn set_rate(&mut self, rate: u8) {
        rtc::rtc_set_rate(rate);
    }
}

const ENTRY_PRESENT: u32 = 1 << 0;
const ENTRY_USER: u32 = 1 << 2;
const ENTRY_HUGE: u32 = 1 << 7;

/// Walks the installed page directory and checks that every page of
/// `addr..addr + len` is present and user-accessible.
fn user_pointer(addr: VirtAddr, len: usize) -> Result<NonNull<u8>, Errno> {
    let ptr = NonNull::new(addr as *mut u8).ok_or(Errno::InvalidArg)?;
    if len == 0 {
        return Ok(ptr);
    }
    let last = addr
        .checked_add(len as u32 - 1)
        .ok_or(Errno::InvalidArg)?;
    let directory = cpu::page_directory() as *const u32;
    let mut page = addr & !(PAGE_BYTES as u32 - 1);
    loop {
        let pde = unsafe { directory.add((page >> 22) as usize).read_volatile() };
        let required = ENTRY_PRESENT | ENTRY_USER;
        if pde & required != required {
            return Err(Errno::InvalidArg);
        }
        if pde & ENTRY_HUGE == 0 {
            let table = (pde & !0xFFF) as *const u32;
            let pte = unsafe { table.add(((page >> 12) & 0x3FF) as usize).read_volatile() };
            if pte & required != required {
                return Err(Errno::InvalidArg);
            }
        }
        match page.checked_add(PAGE_BYTES as u32) {
            Some(next) if next <= last => page = next,
            _ => return Ok(ptr),
        }
    }
}

impl UserMemory for Pc {
    fn copy_from_user(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), Errno> {
        let src = user_pointer(addr, buf.len())?;
        unsafe { copy_nonoverlapping(src.as_ptr(), buf.as_mut_ptr(), buf.len()) }
        Ok(())
    }

    fn copy_to_user(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), Errno> {
        let dst = user_pointer(addr, data.len())?;
        unsafe { copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len()) }
        Ok(())
    }
}
