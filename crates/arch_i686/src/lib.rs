#![cfg_attr(not(test), no_std)]
// Host builds keep the drivers for tests without the CPU glue that calls them.
#![cfg_attr(not(target_arch = "x86"), allow(dead_code))]

//! 32-bit protected-mode support for PC-compatible machines.
//!
//! The CPU-bound parts (descriptor tables, entry stubs, paging registers,
//! context switches) only exist when building for `x86`; the device
//! drivers and the text console logic also build on the host for tests.

#[cfg(target_arch = "x86")]
mod context;
#[cfg(target_arch = "x86")]
mod cpu;
mod gdt;
#[cfg(target_arch = "x86")]
mod idt;
mod input;
mod keyboard;
#[cfg(target_arch = "x86")]
mod pc;
mod pic;
mod port;
mod rtc;
mod vga;

use spin::{Mutex, Once};

use crate::pic::ChainedPics;
use crate::port::Port;

#[cfg(target_arch = "x86")]
pub use context::{enter_user, resume};
#[cfg(target_arch = "x86")]
pub use cpu::{disable_interrupts, enable_interrupts, fault_address, wait_for_interrupt};
pub use keyboard::KeyEvent;
#[cfg(target_arch = "x86")]
pub use pc::{clear_text_page, Pc, TERMINALS};

/// Primary 8259 PIC offset for hardware interrupts.
pub const PIC_1_OFFSET: u8 = 32;
/// Secondary 8259 PIC offset for hardware interrupts.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;
/// Software interrupt carrying system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;
/// Scheduler quantum.
pub const TIMER_PERIOD_MS: u32 = 20;

pub const TIMER_IRQ: u8 = 0;
pub const KEYBOARD_IRQ: u8 = 1;
pub const RTC_IRQ: u8 = 8;

const SERIAL_PORT: u16 = 0x3F8;
const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

static PICS: Mutex<ChainedPics> = Mutex::new(ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET));
static HANDLERS: Once<Handlers> = Once::new();

/// Resumable kernel context captured by the timer and syscall stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct KernelFrame {
    pub esp: u32,
    pub ebp: u32,
}

/// Register state pushed by the exception stubs.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ExceptionFrame {
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub kernel_esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl ExceptionFrame {
    /// True when the fault was raised by ring-3 code.
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    pub fn name(&self) -> &'static str {
        exception_name(self.vector)
    }
}

/// Kernel callbacks invoked from the interrupt stubs.
///
/// Each runs with interrupts disabled. `syscall` and `timer` may leave
/// through `resume`/`enter_user` instead of returning.
#[derive(Clone, Copy)]
pub struct Handlers {
    pub syscall: fn(KernelFrame, u32, u32, u32, u32) -> i32,
    pub timer: fn(KernelFrame),
    pub exception: fn(&ExceptionFrame),
    pub key: fn(KeyEvent),
}

pub fn set_handlers(handlers: Handlers) {
    HANDLERS.call_once(|| handlers);
}

fn handlers() -> Option<&'static Handlers> {
    HANDLERS.get()
}

/// Initializes descriptor tables, interrupt controllers and devices.
/// Interrupts stay disabled.
#[cfg(target_arch = "x86")]
pub fn init() {
    gdt::init_gdt();
    idt::init_idt();
    init_pic();
    init_pit(1000 / TIMER_PERIOD_MS);
    keyboard::keyboard_init();
    rtc::rtc_init();
    unsafe {
        let mut pics = PICS.lock();
        pics.enable_irq(TIMER_IRQ);
        pics.enable_irq(KEYBOARD_IRQ);
        pics.enable_irq(RTC_IRQ);
    }
}

/// Busy-loop with the `hlt` instruction.
#[cfg(target_arch = "x86")]
pub fn halt_loop() -> ! {
    loop {
        cpu::hlt();
    }
}

/// Stops the CPU for good.
#[cfg(target_arch = "x86")]
pub fn halt_forever() -> ! {
    cpu::disable_interrupts();
    halt_loop()
}

/// Writes a byte to the legacy serial port.
pub fn serial_write_byte(byte: u8) {
    unsafe {
        while !serial_transmit_empty() {}
        Port::new(SERIAL_PORT).write(byte);
    }
}

/// Initializes the legacy serial port for early logging.
pub fn init_serial() {
    unsafe {
        Port::new(SERIAL_PORT + 1).write(0x00);
        Port::new(SERIAL_PORT + 3).write(0x80);
        Port::new(SERIAL_PORT).write(0x03);
        Port::new(SERIAL_PORT + 1).write(0x00);
        Port::new(SERIAL_PORT + 3).write(0x03);
        Port::new(SERIAL_PORT + 2).write(0xC7);
        Port::new(SERIAL_PORT + 4).write(0x0B);
    }
}

/// Writes a string to the legacy serial port.
pub fn serial_write_str(text: &str) {
    for byte in text.bytes() {
        if byte == b'\n' {
            serial_write_byte(b'\r');
        }
        serial_write_byte(byte);
    }
}

/// Acknowledges the given IRQ line.
pub fn acknowledge_irq(irq: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + irq);
    }
}

fn init_pic() {
    unsafe {
        PICS.lock().initialize();
    }
}

fn init_pit(frequency_hz: u32) {
    let divisor = PIT_BASE_FREQUENCY / frequency_hz.max(1);
    unsafe {
        Port::new(PIT_COMMAND_PORT).write(0x36);
        Port::new(PIT_CHANNEL0_PORT).write((divisor & 0xFF) as u8);
        Port::new(PIT_CHANNEL0_PORT).write((divisor >> 8) as u8);
    }
}

fn serial_transmit_empty() -> bool {
    unsafe { Port::new(SERIAL_PORT + 5).read() & 0x20 != 0 }
}

pub fn exception_name(vector: u32) -> &'static str {
    match vector {
        0 => "divide error",
        1 => "debug",
        2 => "non-maskable interrupt",
        3 => "breakpoint",
        4 => "overflow",
        5 => "bound range exceeded",
        6 => "invalid opcode",
        7 => "device not available",
        8 => "double fault",
        9 => "coprocessor segment overrun",
        10 => "invalid TSS",
        11 => "segment not present",
        12 => "stack-segment fault",
        13 => "general protection fault",
        14 => "page fault",
        16 => "x87 floating-point error",
        17 => "alignment check",
        18 => "machine check",
        19 => "SIMD floating-point error",
        _ => "reserved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_names_cover_common_faults() {
        assert_eq!(exception_name(14), "page fault");
        assert_eq!(exception_name(13), "general protection fault");
        assert_eq!(exception_name(15), "reserved");
    }

    #[test]
    fn irq_lines_map_into_pic_ranges() {
        let pics = ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET);
        assert!(pics.handles_interrupt(PIC_1_OFFSET + TIMER_IRQ));
        assert!(pics.handles_interrupt(PIC_1_OFFSET + RTC_IRQ));
        assert!(!pics.handles_interrupt(SYSCALL_VECTOR));
    }

    #[test]
    fn timer_runs_at_scheduler_quantum() {
        assert_eq!(1000 / TIMER_PERIOD_MS, 50);
        assert_eq!(PIT_BASE_FREQUENCY / (1000 / TIMER_PERIOD_MS), 23_863);
    }
}
