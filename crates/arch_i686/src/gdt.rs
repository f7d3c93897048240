#[cfg(target_arch = "x86")]
use core::arch::asm;
use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr::{addr_of, addr_of_mut, read_volatile, write_volatile};

#[cfg(target_arch = "x86")]
use spin::Once;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3;
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3;
pub const TSS_SELECTOR: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

/// 32-bit task state segment. Only `esp0`/`ss0` are used; hardware task
/// switching is not.
#[repr(C)]
pub struct TaskStateSegment {
    link: u32,
    esp0: u32,
    ss0: u32,
    unused: [u32; 22],
    trap_and_iomap: u32,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SELECTOR as u32,
            unused: [0; 22],
            // I/O bitmap offset past the limit: no user port access.
            trap_and_iomap: (size_of::<TaskStateSegment>() as u32) << 16,
        }
    }
}

struct TssCell(UnsafeCell<TaskStateSegment>);

// Single CPU; esp0 is only written with interrupts disabled.
unsafe impl Sync for TssCell {}

static TSS: TssCell = TssCell(UnsafeCell::new(TaskStateSegment::new()));
#[cfg(target_arch = "x86")]
static GDT: Once<[u64; GDT_ENTRIES]> = Once::new();

#[cfg(target_arch = "x86")]
#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

const fn segment(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let base = base as u64;
    let limit = limit as u64;
    (limit & 0xFFFF)
        | ((base & 0xFF_FFFF) << 16)
        | ((access as u64) << 40)
        | (((limit >> 16) & 0xF) << 48)
        | (((flags as u64) & 0xF) << 52)
        | (((base >> 24) & 0xFF) << 56)
}

#[cfg(target_arch = "x86")]
fn build_gdt() -> [u64; GDT_ENTRIES] {
    let tss_base = TSS.0.get() as u32;
    let tss_limit = size_of::<TaskStateSegment>() as u32 - 1;
    [
        0,
        segment(0, 0xF_FFFF, 0x9A, 0xC),
        segment(0, 0xF_FFFF, 0x92, 0xC),
        segment(0, 0xF_FFFF, 0xFA, 0xC),
        segment(0, 0xF_FFFF, 0xF2, 0xC),
        segment(tss_base, tss_limit, 0x89, 0x0),
    ]
}

/// Loads the flat kernel/user segments and the task register.
#[cfg(target_arch = "x86")]
pub fn init_gdt() {
    let gdt = GDT.call_once(build_gdt);
    let pointer = DescriptorPointer {
        limit: (size_of::<[u64; GDT_ENTRIES]>() - 1) as u16,
        base: gdt.as_ptr() as u32,
    };
    unsafe {
        asm!("lgdt [{0}]", in(reg) addr_of!(pointer), options(readonly, nostack, preserves_flags));
        asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov fs, {0:x}",
            "mov gs, {0:x}",
            "mov ss, {0:x}",
            in(reg) u32::from(KERNEL_DATA_SELECTOR),
            options(nostack, preserves_flags)
        );
        asm!(
            "push {sel}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            sel = in(reg) u32::from(KERNEL_CODE_SELECTOR),
            tmp = lateout(reg) _,
            options(preserves_flags)
        );
        asm!("ltr {0:x}", in(reg) u32::from(TSS_SELECTOR), options(nostack, preserves_flags));
    }
}

/// Stack the CPU switches to on a user-to-kernel transition.
pub fn kernel_stack() -> u32 {
    unsafe { read_volatile(addr_of!((*TSS.0.get()).esp0)) }
}

pub fn set_kernel_stack(top: u32) {
    unsafe { write_volatile(addr_of_mut!((*TSS.0.get()).esp0), top) }
}
