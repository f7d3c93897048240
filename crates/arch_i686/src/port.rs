use core::arch::asm;

/// An 8-bit I/O port.
#[derive(Debug, Clone, Copy)]
pub struct Port {
    port: u16,
}

impl Port {
    pub const fn new(port: u16) -> Self {
        Self { port }
    }

    /// # Safety
    /// Port reads can have side effects on the device behind `port`.
    pub unsafe fn read(&mut self) -> u8 {
        let value: u8;
        asm!("in al, dx", out("al") value, in("dx") self.port, options(nomem, nostack, preserves_flags));
        value
    }

    /// # Safety
    /// Port writes program hardware directly.
    pub unsafe fn write(&mut self, value: u8) {
        asm!("out dx, al", in("dx") self.port, in("al") value, options(nomem, nostack, preserves_flags));
    }
}

/// Gives slow devices time to settle between writes.
pub fn io_wait() {
    unsafe {
        Port::new(0x80).write(0);
    }
}
