use core::fmt;

use kernel_core::layout::{
    HUGE_PAGE_SIZE, KERNEL_BASE, KERNEL_STACK_BASE, KERNEL_STACK_SIZE, MAX_PROCESSES,
};

/// Value a multiboot loader leaves in `eax`.
pub const BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

const FLAG_MEMORY: u32 = 1 << 0;
const FLAG_MODULES: u32 = 1 << 3;

#[repr(C)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    _boot_device: u32,
    _cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
}

#[repr(C)]
struct Module {
    start: u32,
    end: u32,
    _string: u32,
    _reserved: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    BadMagic(u32),
    NoModule,
    /// The boot image is not inside the kernel's identity-mapped page, or
    /// it overlaps the per-process kernel stacks.
    Misplaced { start: u32, end: u32 },
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(magic) => write!(f, "not loaded by multiboot (eax={:#x})", magic),
            Self::NoModule => write!(f, "no boot filesystem module"),
            Self::Misplaced { start, end } => {
                write!(f, "boot filesystem at [{:#x}-{:#x}] is out of reach", start, end)
            }
        }
    }
}

/// What the loader handed over.
pub struct BootInfo {
    pub lower_kb: Option<u32>,
    pub upper_kb: Option<u32>,
    pub bootfs: &'static [u8],
}

/// Reads the multiboot information block.
///
/// # Safety
/// `info` must be the physical address the loader passed in `ebx`, still
/// reachable (paging off).
pub unsafe fn read_boot_info(magic: u32, info: u32) -> Result<BootInfo, BootError> {
    if magic != BOOTLOADER_MAGIC {
        return Err(BootError::BadMagic(magic));
    }
    let info = &*(info as usize as *const MultibootInfo);
    if info.flags & FLAG_MODULES == 0 || info.mods_count == 0 {
        return Err(BootError::NoModule);
    }
    let module = &*(info.mods_addr as usize as *const Module);
    let (start, end) = check_module(module.start, module.end)?;
    let (lower_kb, upper_kb) = if info.flags & FLAG_MEMORY != 0 {
        (Some(info.mem_lower), Some(info.mem_upper))
    } else {
        (None, None)
    };
    Ok(BootInfo {
        lower_kb,
        upper_kb,
        bootfs: core::slice::from_raw_parts(start as usize as *const u8, (end - start) as usize),
    })
}

/// Lowest address used by the kernel stacks.
const fn stack_floor() -> u32 {
    KERNEL_STACK_BASE - MAX_PROCESSES as u32 * KERNEL_STACK_SIZE
}

/// The boot image must stay readable once paging is on: inside the 4 MB
/// kernel page and below the kernel stacks.
pub fn check_module(start: u32, end: u32) -> Result<(u32, u32), BootError> {
    let ceiling = stack_floor().min(KERNEL_BASE + HUGE_PAGE_SIZE);
    if start < KERNEL_BASE || end < start || end > ceiling {
        return Err(BootError::Misplaced { start, end });
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_inside_kernel_page_is_accepted() {
        assert_eq!(
            check_module(0x42_0000, 0x43_2000),
            Ok((0x42_0000, 0x43_2000))
        );
    }

    #[test]
    fn module_below_kernel_page_is_rejected() {
        assert_eq!(
            check_module(0x10_0000, 0x12_0000),
            Err(BootError::Misplaced {
                start: 0x10_0000,
                end: 0x12_0000
            })
        );
    }

    #[test]
    fn module_reaching_kernel_stacks_is_rejected() {
        let floor = stack_floor();
        assert!(check_module(0x50_0000, floor).is_ok());
        assert!(check_module(0x50_0000, floor + 1).is_err());
    }

    #[test]
    fn errors_render_for_the_console() {
        use core::fmt::Write;

        let mut text = String::new();
        write!(text, "{}", BootError::BadMagic(0x1234)).unwrap();
        assert_eq!(text, "not loaded by multiboot (eax=0x1234)");
    }
}
