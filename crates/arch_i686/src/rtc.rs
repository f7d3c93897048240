use core::sync::atomic::{AtomicBool, Ordering};

use crate::port::Port;

const INDEX_PORT: u16 = 0x70;
const DATA_PORT: u16 = 0x71;
// Bit 7 keeps NMI disabled while a register is selected.
const REG_A: u8 = 0x8A;
const REG_B: u8 = 0x8B;
const REG_C: u8 = 0x0C;
const PERIODIC_ENABLE: u8 = 0x40;
/// 2 Hz, the rate every open starts at.
pub const DEFAULT_RATE: u8 = 0x0F;

static TICKED: AtomicBool = AtomicBool::new(false);

/// Turns on the periodic interrupt at the default rate.
pub fn rtc_init() {
    unsafe {
        let previous = read_register(REG_B);
        write_register(REG_B, previous | PERIODIC_ENABLE);
    }
    rtc_set_rate(DEFAULT_RATE);
}

pub fn rtc_open() {
    rtc_set_rate(DEFAULT_RATE);
    TICKED.store(false, Ordering::Release);
}

/// Programs the rate selector; the periodic frequency is 32768 >> (rate - 1).
pub fn rtc_set_rate(rate: u8) {
    unsafe {
        let previous = read_register(REG_A);
        write_register(REG_A, (previous & 0xF0) | (rate & 0x0F));
    }
}

/// Returns true once for every interrupt since the previous call.
pub fn rtc_take_tick() -> bool {
    TICKED.swap(false, Ordering::AcqRel)
}

/// IRQ8 body. Register C must be read or the RTC stops interrupting.
pub fn rtc_interrupt() {
    unsafe {
        read_register(REG_C);
    }
    TICKED.store(true, Ordering::Release);
}

unsafe fn read_register(reg: u8) -> u8 {
    Port::new(INDEX_PORT).write(reg);
    Port::new(DATA_PORT).read()
}

unsafe fn write_register(reg: u8, value: u8) {
    Port::new(INDEX_PORT).write(reg);
    Port::new(DATA_PORT).write(value);
}
