use core::arch::asm;

use crate::gdt::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use crate::KernelFrame;

const EFLAGS_INTERRUPT_ENABLE: u32 = 1 << 9;

/// Drops to ring 3 at `entry` with the user stack at `stack`.
///
/// # Safety
/// The task segment must already name this process's kernel stack, and
/// `entry`/`stack` must be mapped for user access.
pub unsafe fn enter_user(entry: u32, stack: u32) -> ! {
    asm!(
        "mov ds, {data:x}",
        "mov es, {data:x}",
        "mov fs, {data:x}",
        "mov gs, {data:x}",
        "push {data}",
        "push {stack}",
        "pushfd",
        "or dword ptr [esp], {interrupts}",
        "push {code}",
        "push {entry}",
        "iretd",
        data = in(reg) u32::from(USER_DATA_SELECTOR),
        stack = in(reg) stack,
        entry = in(reg) entry,
        code = const USER_CODE_SELECTOR,
        interrupts = const EFLAGS_INTERRUPT_ENABLE,
        options(noreturn)
    )
}

/// Returns `value` from the switch point that captured `frame`.
///
/// # Safety
/// `frame` must come from a timer or syscall stub whose kernel stack is
/// still intact, with that context's address space already installed.
pub unsafe fn resume(frame: KernelFrame, value: i32) -> ! {
    asm!(
        "mov esp, {esp}",
        "mov ebp, {ebp}",
        "ret",
        esp = in(reg) frame.esp,
        ebp = in(reg) frame.ebp,
        in("eax") value,
        options(noreturn)
    )
}
