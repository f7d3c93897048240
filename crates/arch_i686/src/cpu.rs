use core::arch::asm;

const CR0_PAGING: u32 = 1 << 31;
const CR4_PAGE_SIZE_EXTENSION: u32 = 1 << 4;

pub fn enable_interrupts() {
    unsafe { asm!("sti", options(nomem, nostack)) }
}

pub fn disable_interrupts() {
    unsafe { asm!("cli", options(nomem, nostack)) }
}

pub fn hlt() {
    unsafe { asm!("hlt", options(nomem, nostack)) }
}

/// Sleeps until the next interrupt has been serviced, then returns with
/// interrupts disabled again.
pub fn wait_for_interrupt() {
    unsafe { asm!("sti", "hlt", "cli", options(nomem, nostack)) }
}

/// Installs `directory` and turns on 4 MB-page paging if it is still off.
///
/// # Safety
/// `directory` must identity-map the code that is currently executing.
pub unsafe fn load_page_directory(directory: u32) {
    asm!("mov cr3, {0}", in(reg) directory, options(nostack, preserves_flags));
    let mut cr4: u32;
    asm!("mov {0}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
    cr4 |= CR4_PAGE_SIZE_EXTENSION;
    asm!("mov cr4, {0}", in(reg) cr4, options(nostack, preserves_flags));
    let mut cr0: u32;
    asm!("mov {0}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
    if cr0 & CR0_PAGING == 0 {
        cr0 |= CR0_PAGING;
        asm!("mov cr0, {0}", in(reg) cr0, options(nostack, preserves_flags));
    }
}

pub fn flush_tlb() {
    unsafe {
        asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags)
        );
    }
}

/// Linear address of the most recent page fault.
pub fn fault_address() -> u32 {
    let cr2: u32;
    unsafe { asm!("mov {0}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags)) };
    cr2
}

/// Physical address of the installed page directory.
pub fn page_directory() -> u32 {
    let cr3: u32;
    unsafe { asm!("mov {0}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags)) };
    cr3 & !0xFFF
}
