//! Glue between the interrupt stubs and the kernel context.
//!
//! Every handler takes the kernel lock, runs one core operation, releases
//! the lock and only then performs the resulting transfer, since a transfer
//! to another context never comes back to unlock.

use arch_i686::{self as arch, ExceptionFrame, Handlers, KernelFrame, KeyEvent, Pc};
use hal::Errno;
use kernel_core::{dispatch, BootFs, Frame, Kernel, Transfer};
use spin::Mutex;

type MachineKernel = Kernel<BootFs<'static>, Pc>;

static KERNEL: Mutex<Option<MachineKernel>> = Mutex::new(None);

/// Builds the kernel context over the boot image, turns paging on and
/// hooks the interrupt stubs up to it.
pub fn install(image: &'static [u8]) -> Result<(), Errno> {
    let fs = BootFs::parse(image)?;
    log::info!("bootfs: {} entries", fs.dentry_count());
    let mut slot = KERNEL.lock();
    let kernel = slot.insert(Kernel::new(fs, Pc::new()));
    kernel.init();
    arch::set_handlers(Handlers {
        syscall: on_syscall,
        timer: on_timer,
        exception: on_exception,
        key: on_key,
    });
    Ok(())
}

fn core_frame(frame: KernelFrame) -> Frame {
    Frame {
        esp: frame.esp,
        ebp: frame.ebp,
    }
}

/// Carries out a transfer with the kernel unlocked.
fn leave(transfer: Transfer) -> i32 {
    match transfer {
        Transfer::Return(value) => value,
        Transfer::Resume { frame, value } => unsafe {
            arch::resume(
                KernelFrame {
                    esp: frame.esp,
                    ebp: frame.ebp,
                },
                value,
            )
        },
        Transfer::EnterUser(entry) => {
            log::trace!("enter: pid {} at {:#x}", entry.pid, entry.entry);
            unsafe { arch::enter_user(entry.entry, entry.stack) }
        }
        // Only system calls block, and they retry before getting here.
        Transfer::Retry => -1,
        // The next timer tick dispatches elsewhere and never comes back.
        Transfer::Idle => loop {
            arch::wait_for_interrupt();
        },
    }
}

fn on_syscall(frame: KernelFrame, number: u32, a: u32, b: u32, c: u32) -> i32 {
    let caller = core_frame(frame);
    loop {
        let transfer = match KERNEL.lock().as_mut() {
            Some(kernel) => dispatch(kernel, caller, number, a, b, c),
            None => Transfer::Return(-1),
        };
        match transfer {
            Transfer::Retry => arch::wait_for_interrupt(),
            other => return leave(other),
        }
    }
}

fn on_timer(frame: KernelFrame) {
    let transfer = match KERNEL.lock().as_mut() {
        Some(kernel) => kernel.tick(core_frame(frame)),
        None => Transfer::Return(0),
    };
    leave(transfer);
}

fn on_exception(frame: &ExceptionFrame) {
    if !frame.from_user() {
        panic!(
            "{} in kernel at {:#x} (error {:#x}, cr2 {:#x})",
            frame.name(),
            frame.eip,
            frame.error_code,
            arch::fault_address()
        );
    }
    log::warn!(
        "fault: {} at {:#x} (error {:#x})",
        frame.name(),
        frame.eip,
        frame.error_code
    );
    let halted = match KERNEL.lock().as_mut() {
        Some(kernel) => kernel.halt_on_exception(),
        None => Err(Errno::InvalidArg),
    };
    match halted {
        Ok(transfer) => {
            leave(transfer);
        }
        Err(err) => panic!("cannot halt faulting process: {:?}", err),
    }
}

fn on_key(event: KeyEvent) {
    let mut slot = KERNEL.lock();
    let Some(kernel) = slot.as_mut() else {
        return;
    };
    match event {
        KeyEvent::SwitchTerminal(target) => {
            if let Err(err) = kernel.switch_terminal(target) {
                log::debug!("display: no switch to terminal {}: {:?}", target, err);
            }
        }
        KeyEvent::Char(byte) => {
            let visible = kernel.terminals().visible();
            if let Some(echo) = kernel.hw_mut().key_input(visible, byte) {
                kernel.echo(&[echo]);
            }
        }
    }
}
