#![cfg_attr(not(test), no_std)]

#[cfg(all(feature = "i686", target_arch = "x86"))]
use arch_i686 as arch;

pub mod console;
pub mod logger;
pub mod multiboot;
#[cfg(all(feature = "i686", target_arch = "x86"))]
mod trap;

/// Kernel entrypoint invoked by the multiboot stub.
#[cfg(all(feature = "i686", target_arch = "x86"))]
pub fn entry(magic: u32, info: u32) -> ! {
    use kernel_core::layout::{terminal_page, TERMINAL_COUNT, VIDEO_MEMORY};

    console::init_early();
    logger::init();
    kprintln!("kernel: multiboot entry");

    let boot = match unsafe { multiboot::read_boot_info(magic, info) } {
        Ok(boot) => boot,
        Err(err) => {
            log::error!("boot: {}", err);
            arch::halt_forever();
        }
    };
    if let (Some(lower), Some(upper)) = (boot.lower_kb, boot.upper_kb) {
        log::info!("boot: memory lower={}KB upper={}KB", lower, upper);
    }
    log::info!(
        "boot: bootfs {} bytes at {:#x}",
        boot.bootfs.len(),
        boot.bootfs.as_ptr() as usize
    );

    arch::init();
    // Paging is still off, so every text page is reachable at its
    // physical address.
    unsafe {
        arch::clear_text_page(VIDEO_MEMORY);
        for terminal in 0..TERMINAL_COUNT {
            arch::clear_text_page(terminal_page(terminal));
        }
    }

    if let Err(err) = trap::install(boot.bootfs) {
        log::error!("boot: cannot mount bootfs ({:?})", err);
        arch::halt_forever();
    }
    log::info!(
        "boot: {} terminals, {} ms quantum",
        arch::TERMINALS,
        arch::TIMER_PERIOD_MS
    );
    arch::enable_interrupts();
    arch::halt_loop()
}
