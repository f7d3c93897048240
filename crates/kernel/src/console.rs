use core::fmt::{self, Write};

#[cfg(feature = "i686")]
use arch_i686 as arch;
#[cfg(feature = "i686")]
use spin::Mutex;

// Serializes whole lines so log records never interleave mid-line.
#[cfg(feature = "i686")]
static SERIAL: Mutex<()> = Mutex::new(());

/// Initializes the early serial console.
pub fn init_early() {
    #[cfg(feature = "i686")]
    arch::init_serial();
}

pub fn print(args: fmt::Arguments) {
    #[cfg(feature = "i686")]
    let _guard = SERIAL.lock();
    let mut writer = ConsoleWriter;
    let _ = writer.write_fmt(args);
}

struct ConsoleWriter;

impl Write for ConsoleWriter {
    #[cfg(feature = "i686")]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        arch::serial_write_str(s);
        Ok(())
    }

    #[cfg(not(feature = "i686"))]
    fn write_str(&mut self, _s: &str) -> fmt::Result {
        Ok(())
    }
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::console::print(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint!("\n");
    }};
    ($($arg:tt)*) => {{
        $crate::kprint!("{}\n", format_args!($($arg)*));
    }};
}
