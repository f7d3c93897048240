use hal::{Errno, Platform, UserMemory, VirtAddr};

use crate::fs::Filesystem;
use crate::kernel::{Kernel, Transfer};
use crate::layout::{
    is_program_address, validate_user_buffer, HUGE_PAGE_SIZE, MAX_ARGS, MAX_NAME, USER_BASE,
};
use crate::process::Frame;

/// Bounce buffer size for read and write.
const IO_CHUNK: usize = 1024;
/// Longest command line accepted by execute, terminator included.
const COMMAND_MAX: usize = MAX_NAME + MAX_ARGS + 64;

/// System calls reachable through the software interrupt gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt,
    Execute,
    Read,
    Write,
    Open,
    Close,
    GetArgs,
    Vidmap,
    SetHandler,
    Sigreturn,
}

impl Syscall {
    pub const fn from_number(number: u32) -> Option<Self> {
        Some(match number {
            1 => Syscall::Halt,
            2 => Syscall::Execute,
            3 => Syscall::Read,
            4 => Syscall::Write,
            5 => Syscall::Open,
            6 => Syscall::Close,
            7 => Syscall::GetArgs,
            8 => Syscall::Vidmap,
            9 => Syscall::SetHandler,
            10 => Syscall::Sigreturn,
            _ => return None,
        })
    }

    pub const fn number(self) -> u32 {
        match self {
            Syscall::Halt => 1,
            Syscall::Execute => 2,
            Syscall::Read => 3,
            Syscall::Write => 4,
            Syscall::Open => 5,
            Syscall::Close => 6,
            Syscall::GetArgs => 7,
            Syscall::Vidmap => 8,
            Syscall::SetHandler => 9,
            Syscall::Sigreturn => 10,
        }
    }
}

/// Decodes and runs one system call.
///
/// `frame` is the caller's kernel context, recorded by `execute` so the
/// child's `halt` can return into it. Every failure is reported to user
/// space as -1.
pub fn dispatch<F: Filesystem, H: Platform>(
    kernel: &mut Kernel<F, H>,
    frame: Frame,
    number: u32,
    a: u32,
    b: u32,
    c: u32,
) -> Transfer {
    let Some(call) = Syscall::from_number(number) else {
        log::debug!("syscall: unknown number {}", number);
        return Transfer::Return(-1);
    };
    match handle(kernel, call, frame, a, b, c) {
        Ok(transfer) => transfer,
        Err(Errno::WouldBlock) => Transfer::Retry,
        Err(err) => {
            log::debug!("syscall: {:?} failed: {:?}", call, err);
            Transfer::Return(-1)
        }
    }
}

fn handle<F: Filesystem, H: Platform>(
    kernel: &mut Kernel<F, H>,
    call: Syscall,
    frame: Frame,
    a: u32,
    b: u32,
    c: u32,
) -> Result<Transfer, Errno> {
    match call {
        Syscall::Halt => kernel.halt(a & 0xFF),
        Syscall::Execute => {
            let mut buf = [0u8; COMMAND_MAX];
            let command = user_string(kernel.hw(), a, &mut buf)?;
            kernel.execute(command, frame).map(Transfer::EnterUser)
        }
        Syscall::Read => read(kernel, a as usize, b, c),
        Syscall::Write => write(kernel, a as usize, b, c),
        Syscall::Open => {
            let mut buf = [0u8; MAX_NAME + 1];
            let name = user_string(kernel.hw(), a, &mut buf)?;
            kernel.open(name).map(|fd| Transfer::Return(fd as i32))
        }
        Syscall::Close => kernel.close(a as usize).map(|()| Transfer::Return(0)),
        Syscall::GetArgs => {
            let len = (b as i32).clamp(0, MAX_ARGS as i32) as usize;
            if len == 0 {
                return Err(Errno::InvalidArg);
            }
            validate_user_buffer(a, len as u32)?;
            let mut buf = [0u8; MAX_ARGS];
            let written = kernel.get_arguments(&mut buf[..len])?;
            kernel.hw_mut().copy_to_user(a, &buf[..written])?;
            Ok(Transfer::Return(0))
        }
        Syscall::Vidmap => {
            let addr = kernel.map_video(a)?;
            kernel.hw_mut().copy_to_user(a, &addr.to_le_bytes())?;
            Ok(Transfer::Return(0))
        }
        Syscall::SetHandler => kernel.set_handler(a, b).map(|()| Transfer::Return(0)),
        Syscall::Sigreturn => kernel.sigreturn().map(|()| Transfer::Return(0)),
    }
}

fn read<F: Filesystem, H: Platform>(
    kernel: &mut Kernel<F, H>,
    fd: usize,
    addr: VirtAddr,
    len: u32,
) -> Result<Transfer, Errno> {
    let len = byte_count(len)?;
    if len == 0 {
        return kernel.read(fd, &mut []).map(|n| Transfer::Return(n as i32));
    }
    validate_user_buffer(addr, len as u32)?;
    let mut buf = [0u8; IO_CHUNK];
    let mut total = 0usize;
    while total < len {
        let chunk = (len - total).min(IO_CHUNK);
        let n = match kernel.read(fd, &mut buf[..chunk]) {
            Ok(n) => n,
            // Keep what the earlier chunks already delivered.
            Err(_) if total > 0 => break,
            Err(err) => return Err(err),
        };
        kernel
            .hw_mut()
            .copy_to_user(addr + total as u32, &buf[..n])?;
        total += n;
        if n < chunk {
            break;
        }
    }
    Ok(Transfer::Return(total as i32))
}

fn write<F: Filesystem, H: Platform>(
    kernel: &mut Kernel<F, H>,
    fd: usize,
    addr: VirtAddr,
    len: u32,
) -> Result<Transfer, Errno> {
    let len = byte_count(len)?;
    if len == 0 {
        return kernel.write(fd, &[]).map(|n| Transfer::Return(n as i32));
    }
    validate_user_buffer(addr, len as u32)?;
    let mut buf = [0u8; IO_CHUNK];
    let mut total = 0usize;
    while total < len {
        let chunk = (len - total).min(IO_CHUNK);
        kernel
            .hw()
            .copy_from_user(addr + total as u32, &mut buf[..chunk])?;
        let n = kernel.write(fd, &buf[..chunk])?;
        total += n;
        if n < chunk {
            break;
        }
    }
    Ok(Transfer::Return(total as i32))
}

/// Byte counts travel as signed integers; negative ones are rejected.
fn byte_count(len: u32) -> Result<usize, Errno> {
    let len = len as i32;
    if len < 0 {
        return Err(Errno::InvalidArg);
    }
    Ok(len as usize)
}

/// Copies a NUL-terminated string out of the program page.
fn user_string<'b, M: UserMemory + ?Sized>(
    mem: &M,
    addr: VirtAddr,
    buf: &'b mut [u8],
) -> Result<&'b [u8], Errno> {
    if !is_program_address(addr) {
        return Err(Errno::InvalidArg);
    }
    let room = (USER_BASE + HUGE_PAGE_SIZE - addr) as usize;
    let len = buf.len().min(room);
    mem.copy_from_user(addr, &mut buf[..len])?;
    let end = buf[..len]
        .iter()
        .position(|&byte| byte == 0)
        .ok_or(Errno::InvalidArg)?;
    Ok(&buf[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootfs::BootFs;
    use crate::layout::{USER_IMAGE, USER_VIDEO};
    use crate::testing::{program, sample_image, MockPlatform, SAMPLE_ENTRY};

    const SCRATCH: VirtAddr = USER_IMAGE + 0x10000;

    fn boot(image: &[u8]) -> Box<Kernel<BootFs<'_>, MockPlatform>> {
        let fs = BootFs::parse(image).expect("image should parse");
        let mut kernel = Box::new(Kernel::new(fs, MockPlatform::new()));
        kernel.init();
        kernel
            .execute(b"shell", Frame::default())
            .expect("shell should start");
        kernel
    }

    fn poke(kernel: &mut Kernel<BootFs<'_>, MockPlatform>, addr: VirtAddr, bytes: &[u8]) {
        kernel
            .hw_mut()
            .copy_to_user(addr, bytes)
            .expect("address in program page");
    }

    fn call(
        kernel: &mut Kernel<BootFs<'_>, MockPlatform>,
        syscall: Syscall,
        a: u32,
        b: u32,
        c: u32,
    ) -> Transfer {
        dispatch(kernel, Frame { esp: 0x7F_E000, ebp: 0x7F_E010 }, syscall.number(), a, b, c)
    }

    #[test]
    fn numbers_round_trip() {
        for n in 1..=10 {
            let call = Syscall::from_number(n).expect("known number");
            assert_eq!(call.number(), n);
        }
        assert_eq!(Syscall::from_number(0), None);
        assert_eq!(Syscall::from_number(11), None);
    }

    #[test]
    fn unknown_number_fails() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(
            dispatch(&mut *kernel, Frame::default(), 42, 0, 0, 0),
            Transfer::Return(-1)
        );
    }

    #[test]
    fn execute_reads_command_from_user_memory() {
        let image = sample_image();
        let mut kernel = boot(&image);
        poke(&mut kernel, SCRATCH, b"ls frame0.txt\0");
        match call(&mut kernel, Syscall::Execute, SCRATCH, 0, 0) {
            Transfer::EnterUser(entry) => assert_eq!(entry.pid, 1),
            other => panic!("unexpected transfer {:?}", other),
        }
        assert_eq!(
            kernel.processes().by_pid(0).map(|pcb| pcb.saved),
            Some(Frame {
                esp: 0x7F_E000,
                ebp: 0x7F_E010
            })
        );
    }

    #[test]
    fn execute_rejects_bad_pointers() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(call(&mut kernel, Syscall::Execute, 0, 0, 0), Transfer::Return(-1));
        poke(&mut kernel, SCRATCH, &[b'a'; COMMAND_MAX]);
        assert_eq!(
            call(&mut kernel, Syscall::Execute, SCRATCH, 0, 0),
            Transfer::Return(-1)
        );
    }

    #[test]
    fn open_read_write_through_abi() {
        let image = sample_image();
        let mut kernel = boot(&image);
        poke(&mut kernel, SCRATCH, b"frame0.txt\0");
        assert_eq!(call(&mut kernel, Syscall::Open, SCRATCH, 0, 0), Transfer::Return(2));

        let dst = SCRATCH + 0x100;
        assert_eq!(
            call(&mut kernel, Syscall::Read, 2, dst, 1000),
            Transfer::Return(12)
        );
        assert_eq!(kernel.hw().user_bytes(dst, 12), b"/\\/\\/\\ fish\n");
        assert_eq!(call(&mut kernel, Syscall::Read, 2, dst, 1000), Transfer::Return(0));

        assert_eq!(
            call(&mut kernel, Syscall::Write, 1, dst, 12),
            Transfer::Return(12)
        );
        assert_eq!(kernel.hw().output[0], b"/\\/\\/\\ fish\n".to_vec());
        assert_eq!(call(&mut kernel, Syscall::Close, 2, 0, 0), Transfer::Return(0));
        assert_eq!(call(&mut kernel, Syscall::Close, 2, 0, 0), Transfer::Return(-1));
    }

    #[test]
    fn read_rejects_kernel_buffers() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(
            call(&mut kernel, Syscall::Read, 0, 0x0010_0000, 16),
            Transfer::Return(-1)
        );
    }

    #[test]
    fn read_fills_requests_larger_than_one_chunk() {
        let image = sample_image();
        let mut kernel = boot(&image);
        poke(&mut kernel, SCRATCH, b"shell\0");
        assert_eq!(call(&mut kernel, Syscall::Open, SCRATCH, 0, 0), Transfer::Return(2));

        let dst = SCRATCH + 0x100;
        assert_eq!(
            call(&mut kernel, Syscall::Read, 2, dst, 3000),
            Transfer::Return(3000)
        );
        let shell = program(SAMPLE_ENTRY, 5000);
        assert_eq!(kernel.hw().user_bytes(dst, 3000), &shell[..3000]);
        assert_eq!(
            call(&mut kernel, Syscall::Read, 2, dst, 3000),
            Transfer::Return(2000)
        );
        assert_eq!(kernel.hw().user_bytes(dst, 2000), &shell[3000..]);
        assert_eq!(call(&mut kernel, Syscall::Read, 2, dst, 3000), Transfer::Return(0));
    }

    #[test]
    fn negative_byte_counts_fail_without_touching_input() {
        let image = sample_image();
        let mut kernel = boot(&image);
        kernel.hw_mut().push_line(0, b"ls\n");
        assert_eq!(
            call(&mut kernel, Syscall::Read, 0, SCRATCH, -1i32 as u32),
            Transfer::Return(-1)
        );
        assert_eq!(
            call(&mut kernel, Syscall::Write, 1, SCRATCH, -5i32 as u32),
            Transfer::Return(-1)
        );
        assert!(kernel.hw().output[0].is_empty());
        assert_eq!(call(&mut kernel, Syscall::Read, 0, SCRATCH, 0), Transfer::Return(0));
        assert_eq!(
            call(&mut kernel, Syscall::Read, 0, SCRATCH, 128),
            Transfer::Return(3)
        );
        assert_eq!(kernel.hw().user_bytes(SCRATCH, 3), b"ls\n");
    }

    #[test]
    fn stdin_read_without_line_retries() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(call(&mut kernel, Syscall::Read, 0, SCRATCH, 128), Transfer::Retry);
        kernel.hw_mut().push_line(0, b"ls\n");
        assert_eq!(
            call(&mut kernel, Syscall::Read, 0, SCRATCH, 128),
            Transfer::Return(3)
        );
        assert_eq!(kernel.hw().user_bytes(SCRATCH, 3), b"ls\n");
    }

    #[test]
    fn getargs_fails_without_arguments_and_leaves_buffer() {
        let image = sample_image();
        let mut kernel = boot(&image);
        poke(&mut kernel, SCRATCH, &[0x5A; 8]);
        assert_eq!(
            call(&mut kernel, Syscall::GetArgs, SCRATCH, 8, 0),
            Transfer::Return(-1)
        );
        assert_eq!(kernel.hw().user_bytes(SCRATCH, 8), &[0x5A; 8]);
    }

    #[test]
    fn getargs_copies_terminated_string() {
        let image = sample_image();
        let mut kernel = boot(&image);
        poke(&mut kernel, SCRATCH, b"counter 12 34\0");
        call(&mut kernel, Syscall::Execute, SCRATCH, 0, 0);
        let dst = SCRATCH + 0x200;
        assert_eq!(
            call(&mut kernel, Syscall::GetArgs, dst, 32, 0),
            Transfer::Return(0)
        );
        assert_eq!(kernel.hw().user_bytes(dst, 6), b"12 34\0");
    }

    #[test]
    fn vidmap_stores_window_address() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(call(&mut kernel, Syscall::Vidmap, SCRATCH, 0, 0), Transfer::Return(0));
        assert_eq!(kernel.hw().user_bytes(SCRATCH, 4), &USER_VIDEO.to_le_bytes());
        assert_eq!(call(&mut kernel, Syscall::Vidmap, 0x1000, 0, 0), Transfer::Return(-1));
    }

    #[test]
    fn rtc_write_returns_zero() {
        let image = sample_image();
        let mut kernel = boot(&image);
        poke(&mut kernel, SCRATCH, b"rtc\0");
        assert_eq!(call(&mut kernel, Syscall::Open, SCRATCH, 0, 0), Transfer::Return(2));
        poke(&mut kernel, SCRATCH + 0x40, &64i32.to_le_bytes());
        assert_eq!(
            call(&mut kernel, Syscall::Write, 2, SCRATCH + 0x40, 4),
            Transfer::Return(0)
        );
        assert_eq!(kernel.hw().rtc_rate, Some(0x0A));
        assert_eq!(call(&mut kernel, Syscall::Read, 2, SCRATCH, 4), Transfer::Retry);
    }

    #[test]
    fn signal_calls_fail() {
        let image = sample_image();
        let mut kernel = boot(&image);
        assert_eq!(call(&mut kernel, Syscall::SetHandler, 2, SCRATCH, 0), Transfer::Return(-1));
        assert_eq!(call(&mut kernel, Syscall::Sigreturn, 0, 0, 0), Transfer::Return(-1));
    }

    #[test]
    fn halt_masks_status_to_a_byte() {
        let image = sample_image();
        let mut kernel = boot(&image);
        poke(&mut kernel, SCRATCH, b"ls\0");
        call(&mut kernel, Syscall::Execute, SCRATCH, 0, 0);
        match call(&mut kernel, Syscall::Halt, 0x1FF, 0, 0) {
            Transfer::Resume { value, .. } => assert_eq!(value, 0xFF),
            other => panic!("unexpected transfer {:?}", other),
        }
    }
}
