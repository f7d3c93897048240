#![cfg_attr(not(test), no_std)]

/// Physical address type.
pub type PhysAddr = u32;

/// Virtual address type.
pub type VirtAddr = u32;

/// Physical address of a page directory.
pub type PagingRoot = PhysAddr;

/// Common error codes used by kernel interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    InvalidArg,
    NoMem,
    NoPerm,
    NotFound,
    NotExecutable,
    Busy,
    WouldBlock,
    Unimplemented,
}

/// Page table mapping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(u32);

impl PageFlags {
    pub const NONE: Self = Self(0);
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0x1FF)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Text-mode cursor position of a terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub x: u16,
    pub y: u16,
}

/// Architecture-specific paging operations.
pub trait PagingOps {
    /// Install the page directory at `root`.
    fn load_root(&self, root: PagingRoot);

    /// Invalidate all cached translations.
    fn flush_tlb(&self);
}

/// Access to the kernel stack pointer used on privilege transitions.
pub trait TaskSegment {
    fn kernel_stack(&self) -> VirtAddr;
    fn set_kernel_stack(&mut self, top: VirtAddr);
}

/// Text display hardware.
pub trait Display {
    /// Move the hardware cursor of the physical screen.
    fn set_cursor(&mut self, cursor: Cursor);

    /// Copy one 4 KB page between two kernel-virtual addresses.
    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr);
}

/// Per-terminal console driver.
pub trait Console {
    /// Writes bytes to a terminal whose text currently lives in the 4 KB
    /// page at `screen`, and returns the terminal's new cursor position.
    fn write(&mut self, terminal: usize, screen: VirtAddr, bytes: &[u8]) -> Cursor;

    /// Copies a completed input line into `buf`, or returns `None` while the
    /// line is still being typed.
    fn poll_line(&mut self, terminal: usize, buf: &mut [u8]) -> Option<usize>;
}

/// Real-time clock driver.
pub trait Rtc {
    fn open(&mut self);

    /// Returns true once per interrupt delivered since the previous true.
    fn poll_tick(&mut self) -> bool;

    /// Programs the periodic rate selector (0x06..=0x0F).
    fn set_rate(&mut self, rate: u8);
}

/// Kernel access to memory reachable through the current user mappings.
pub trait UserMemory {
    fn copy_from_user(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), Errno>;
    fn copy_to_user(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), Errno>;
}

/// Everything the kernel core needs from the machine.
pub trait Platform: PagingOps + TaskSegment + Display + Console + Rtc + UserMemory {}

impl<T> Platform for T where T: PagingOps + TaskSegment + Display + Console + Rtc + UserMemory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_flags_union_and_contains() {
        let flags = PageFlags::PRESENT.union(PageFlags::WRITE);
        assert!(flags.contains(PageFlags::PRESENT));
        assert!(flags.contains(PageFlags::WRITE));
        assert!(!flags.contains(PageFlags::USER));
    }

    #[test]
    fn page_flags_difference_clears_bits() {
        let flags = PageFlags::PRESENT.union(PageFlags::HUGE);
        let cleared = flags.difference(PageFlags::PRESENT);
        assert!(!cleared.contains(PageFlags::PRESENT));
        assert!(cleared.contains(PageFlags::HUGE));
    }

    #[test]
    fn page_flags_from_bits_drops_base_bits() {
        let flags = PageFlags::from_bits(0x0040_0087);
        assert_eq!(flags.bits(), 0x87);
    }
}
