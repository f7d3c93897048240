//! Fixed memory layout shared with existing user executables.

use hal::{Errno, PhysAddr, VirtAddr};

/// Size of a small page in bytes.
pub const PAGE_SIZE: u32 = 0x1000;
/// Size of a huge page in bytes.
pub const HUGE_PAGE_SIZE: u32 = 0x40_0000;
/// Entries per page directory or page table.
pub const TABLE_ENTRIES: usize = 1024;

/// Physical (and virtual) base of the identity-mapped kernel page.
pub const KERNEL_BASE: u32 = 0x40_0000;
/// Physical text-mode video memory.
pub const VIDEO_MEMORY: PhysAddr = 0xB8000;
/// Permanent kernel alias of physical video memory.
pub const SCREEN_ALIAS: VirtAddr = VIDEO_MEMORY + PAGE_SIZE;
/// Backing page of terminal 0; the others follow page by page.
pub const TERMINAL_PAGE_BASE: PhysAddr = VIDEO_MEMORY + 2 * PAGE_SIZE;

/// Virtual base of the per-process program page.
pub const USER_BASE: VirtAddr = 0x0800_0000;
/// Offset of the program image inside the program page.
pub const LOAD_OFFSET: u32 = 0x48000;
/// Virtual address the program image is copied to.
pub const USER_IMAGE: VirtAddr = USER_BASE + LOAD_OFFSET;
/// Initial user stack pointer.
pub const USER_STACK_TOP: VirtAddr = USER_BASE + HUGE_PAGE_SIZE - 4;
/// Virtual address of the user video window, right after the program page.
pub const USER_VIDEO: VirtAddr = USER_BASE + HUGE_PAGE_SIZE;

/// Physical frame of the first program page.
pub const PROGRAM_FRAME_BASE: PhysAddr = 0x80_0000;
/// Top of the kernel stack region; stacks grow down from here.
pub const KERNEL_STACK_BASE: VirtAddr = 0x80_0000;
/// Spacing between consecutive per-process kernel stacks.
pub const KERNEL_STACK_SIZE: u32 = 0x2000;

/// Magic bytes at the start of every executable.
pub const EXEC_MAGIC: [u8; 4] = [0x7F, 0x45, 0x4C, 0x46];
/// Byte offset of the little-endian entry point inside an executable.
pub const ENTRY_POINT_OFFSET: u32 = 24;
/// Largest image copied into the program page.
pub const MAX_IMAGE_SIZE: usize = 100_000;

/// Maximum number of concurrently active processes.
pub const MAX_PROCESSES: usize = 6;
/// Descriptor table size per process.
pub const MAX_FILES: usize = 8;
/// Descriptors 0 and 1 are the standard streams.
pub const FIRST_USER_FD: usize = 2;
/// Capacity of the per-process argument buffer.
pub const MAX_ARGS: usize = 128;
/// Maximum length of a file name.
pub const MAX_NAME: usize = 32;
/// Number of virtual terminals.
pub const TERMINAL_COUNT: usize = 3;

/// Physical frame backing the program page of `pid`.
pub const fn program_frame(pid: u32) -> PhysAddr {
    PROGRAM_FRAME_BASE + pid * HUGE_PAGE_SIZE
}

/// Initial kernel stack pointer of `pid`.
pub const fn kernel_stack_top(pid: u32) -> VirtAddr {
    KERNEL_STACK_BASE - pid * KERNEL_STACK_SIZE - 4
}

/// Backing page holding the off-screen contents of `terminal`.
pub const fn terminal_page(terminal: usize) -> PhysAddr {
    TERMINAL_PAGE_BASE + terminal as u32 * PAGE_SIZE
}

/// Returns true if the address lies inside the program page.
pub fn is_program_address(addr: VirtAddr) -> bool {
    (USER_BASE..USER_BASE + HUGE_PAGE_SIZE).contains(&addr)
}

/// Validates that a user buffer lies entirely inside the program page.
pub fn validate_user_buffer(addr: VirtAddr, len: u32) -> Result<(), Errno> {
    if len == 0 {
        return Err(Errno::InvalidArg);
    }
    let end = addr.checked_add(len - 1).ok_or(Errno::InvalidArg)?;
    if is_program_address(addr) && is_program_address(end) {
        Ok(())
    } else {
        Err(Errno::NoPerm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_executable_abi() {
        assert_eq!(USER_IMAGE, 0x0804_8000);
        assert_eq!(USER_VIDEO, 0x0840_0000);
        assert_eq!(USER_STACK_TOP, 0x083F_FFFC);
        assert_eq!(TERMINAL_PAGE_BASE, 0xBA000);
    }

    #[test]
    fn program_frames_do_not_overlap() {
        for a in 0..MAX_PROCESSES as u32 {
            for b in (a + 1)..MAX_PROCESSES as u32 {
                let (fa, fb) = (program_frame(a), program_frame(b));
                assert!(fa + HUGE_PAGE_SIZE <= fb || fb + HUGE_PAGE_SIZE <= fa);
            }
            assert!(program_frame(a) >= KERNEL_BASE + HUGE_PAGE_SIZE);
        }
    }

    #[test]
    fn kernel_stacks_stay_in_kernel_page() {
        for pid in 0..MAX_PROCESSES as u32 {
            let top = kernel_stack_top(pid);
            assert!(top >= KERNEL_BASE && top < KERNEL_BASE + HUGE_PAGE_SIZE);
        }
        assert_eq!(kernel_stack_top(0), 0x7F_FFFC);
        assert_eq!(kernel_stack_top(1), 0x7F_DFFC);
    }

    #[test]
    fn user_buffer_validation() {
        assert_eq!(validate_user_buffer(USER_IMAGE, 4), Ok(()));
        assert_eq!(validate_user_buffer(USER_IMAGE, 0), Err(Errno::InvalidArg));
        assert_eq!(validate_user_buffer(0x1000, 4), Err(Errno::NoPerm));
        assert_eq!(
            validate_user_buffer(USER_BASE + HUGE_PAGE_SIZE - 2, 4),
            Err(Errno::NoPerm)
        );
    }

    #[test]
    fn user_buffer_overflow_is_invalid() {
        let result = validate_user_buffer(u32::MAX - 1, 4);
        assert_eq!(result, Err(Errno::InvalidArg));
    }
}
