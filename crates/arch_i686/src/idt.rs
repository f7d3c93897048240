//! Interrupt descriptor table and the assembly entry stubs.
//!
//! Every stub saves the interrupted registers on the current kernel stack.
//! The timer and syscall stubs additionally `call` a small switch point
//! whose return address is the resumable kernel context handed to Rust:
//! returning through it (`ret` with `esp`/`ebp` restored) unwinds the stub
//! and `iret`s back to whatever that context interrupted.

use core::arch::{asm, global_asm};
use core::mem::size_of;
use core::ptr::addr_of;

use spin::Once;

use crate::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use crate::{
    acknowledge_irq, handlers, ExceptionFrame, KernelFrame, KEYBOARD_IRQ, PIC_1_OFFSET, RTC_IRQ,
    SYSCALL_VECTOR, TIMER_IRQ,
};

const EXCEPTION_COUNT: usize = 20;
const INTERRUPT_GATE: u8 = 0x8E;
const USER_INTERRUPT_GATE: u8 = 0xEE;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    attributes: u8,
    offset_high: u16,
}

impl IdtEntry {
    const MISSING: Self = Self {
        offset_low: 0,
        selector: 0,
        zero: 0,
        attributes: 0,
        offset_high: 0,
    };

    fn gate(handler: u32, attributes: u8) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            attributes,
            offset_high: (handler >> 16) as u16,
        }
    }
}

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

static IDT: Once<[IdtEntry; 256]> = Once::new();

extern "C" {
    static exception_stubs: [u32; EXCEPTION_COUNT];
    fn isr_timer();
    fn isr_keyboard();
    fn isr_rtc();
    fn isr_syscall();
}

fn build_idt() -> [IdtEntry; 256] {
    let mut idt = [IdtEntry::MISSING; 256];
    let stubs = unsafe { &*addr_of!(exception_stubs) };
    for (entry, &stub) in idt.iter_mut().zip(stubs.iter()) {
        *entry = IdtEntry::gate(stub, INTERRUPT_GATE);
    }
    idt[usize::from(PIC_1_OFFSET + TIMER_IRQ)] =
        IdtEntry::gate(isr_timer as usize as u32, INTERRUPT_GATE);
    idt[usize::from(PIC_1_OFFSET + KEYBOARD_IRQ)] =
        IdtEntry::gate(isr_keyboard as usize as u32, INTERRUPT_GATE);
    idt[usize::from(PIC_1_OFFSET + RTC_IRQ)] =
        IdtEntry::gate(isr_rtc as usize as u32, INTERRUPT_GATE);
    // Interrupt gate: the kernel runs every syscall with IF clear.
    idt[usize::from(SYSCALL_VECTOR)] =
        IdtEntry::gate(isr_syscall as usize as u32, USER_INTERRUPT_GATE);
    idt
}

pub fn init_idt() {
    let idt = IDT.call_once(build_idt);
    let pointer = DescriptorPointer {
        limit: (size_of::<[IdtEntry; 256]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    unsafe {
        asm!("lidt [{0}]", in(reg) addr_of!(pointer), options(readonly, nostack, preserves_flags));
    }
}

extern "C" fn exception_entry(frame: &ExceptionFrame) {
    if let Some(handlers) = handlers() {
        (handlers.exception)(frame);
    }
}

extern "C" fn timer_entry(esp: u32, ebp: u32) {
    // Acknowledge first: the handler may never return here.
    acknowledge_irq(TIMER_IRQ);
    if let Some(handlers) = handlers() {
        (handlers.timer)(KernelFrame { esp, ebp });
    }
}

extern "C" fn syscall_entry(esp: u32, ebp: u32, number: u32, a: u32, b: u32, c: u32) -> i32 {
    match handlers() {
        Some(handlers) => (handlers.syscall)(KernelFrame { esp, ebp }, number, a, b, c),
        None => -1,
    }
}

extern "C" fn irq_entry(irq: u32) {
    let irq = irq as u8;
    match irq {
        KEYBOARD_IRQ => {
            if let Some(event) = crate::keyboard::keyboard_read_event() {
                if let Some(handlers) = handlers() {
                    (handlers.key)(event);
                }
            }
        }
        RTC_IRQ => crate::rtc::rtc_interrupt(),
        _ => {}
    }
    acknowledge_irq(irq);
}

global_asm!(
    r#"
.macro EXCEPTION_STUB vector, error_code
.global isr_exception_\vector
isr_exception_\vector:
.if \error_code == 0
    push 0
.endif
    push \vector
    jmp isr_exception_common
.endm

.macro IRQ_STUB name, irq
.global \name
\name:
    pushad
    push ds
    push es
    mov ax, {kernel_data}
    mov ds, ax
    mov es, ax
    cld
    push \irq
    call {irq_entry}
    add esp, 4
    pop es
    pop ds
    popad
    iretd
.endm

EXCEPTION_STUB 0, 0
EXCEPTION_STUB 1, 0
EXCEPTION_STUB 2, 0
EXCEPTION_STUB 3, 0
EXCEPTION_STUB 4, 0
EXCEPTION_STUB 5, 0
EXCEPTION_STUB 6, 0
EXCEPTION_STUB 7, 0
EXCEPTION_STUB 8, 1
EXCEPTION_STUB 9, 0
EXCEPTION_STUB 10, 1
EXCEPTION_STUB 11, 1
EXCEPTION_STUB 12, 1
EXCEPTION_STUB 13, 1
EXCEPTION_STUB 14, 1
EXCEPTION_STUB 15, 0
EXCEPTION_STUB 16, 0
EXCEPTION_STUB 17, 1
EXCEPTION_STUB 18, 0
EXCEPTION_STUB 19, 0

isr_exception_common:
    pushad
    push ds
    push es
    mov ax, {kernel_data}
    mov ds, ax
    mov es, ax
    cld
    push esp
    call {exception_entry}
    add esp, 4
    pop es
    pop ds
    popad
    add esp, 8
    iretd

IRQ_STUB isr_keyboard, {keyboard_irq}
IRQ_STUB isr_rtc, {rtc_irq}

.global isr_timer
isr_timer:
    pushad
    push ds
    push es
    mov ax, {kernel_data}
    mov ds, ax
    mov es, ax
    cld
    call timer_switch_point
    pop es
    pop ds
    popad
    iretd

timer_switch_point:
    mov eax, esp
    push ebp
    push eax
    call {timer_entry}
    add esp, 8
    ret

.global isr_syscall
isr_syscall:
    push ebp
    push edi
    push esi
    push edx
    push ecx
    push ebx
    push ds
    push es
    mov si, {kernel_data}
    mov ds, si
    mov es, si
    cld
    push edx
    push ecx
    push ebx
    push eax
    call syscall_switch_point
    add esp, 16
    pop es
    pop ds
    pop ebx
    pop ecx
    pop edx
    pop esi
    pop edi
    pop ebp
    iretd

syscall_switch_point:
    mov ecx, esp
    push dword ptr [ecx + 16]
    push dword ptr [ecx + 12]
    push dword ptr [ecx + 8]
    push dword ptr [ecx + 4]
    push ebp
    push ecx
    call {syscall_entry}
    add esp, 24
    ret

.section .rodata
.balign 4
.global exception_stubs
exception_stubs:
    .long isr_exception_0, isr_exception_1, isr_exception_2, isr_exception_3
    .long isr_exception_4, isr_exception_5, isr_exception_6, isr_exception_7
    .long isr_exception_8, isr_exception_9, isr_exception_10, isr_exception_11
    .long isr_exception_12, isr_exception_13, isr_exception_14, isr_exception_15
    .long isr_exception_16, isr_exception_17, isr_exception_18, isr_exception_19
.text
"#,
    kernel_data = const KERNEL_DATA_SELECTOR,
    keyboard_irq = const KEYBOARD_IRQ,
    rtc_irq = const RTC_IRQ,
    exception_entry = sym exception_entry,
    timer_entry = sym timer_entry,
    syscall_entry = sym syscall_entry,
    irq_entry = sym irq_entry,
);
