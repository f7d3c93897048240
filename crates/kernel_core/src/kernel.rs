use hal::{Errno, Platform, VirtAddr};

use crate::exec::{load_image, parse_command, read_entry_point};
use crate::file::{FileDescriptor, FileIo, FileKind};
use crate::fs::Filesystem;
use crate::layout::{
    kernel_stack_top, terminal_page, validate_user_buffer, FIRST_USER_FD, MAX_FILES,
    TERMINAL_COUNT, USER_BASE, USER_STACK_TOP, USER_VIDEO, VIDEO_MEMORY,
};
use crate::paging::AddressSpace;
use crate::process::{ArgBuffer, Frame, Pcb, Pid, ProcState, ProcessTable};
use crate::terminal::TerminalRegistry;

/// Status reported to the parent when a process dies from a CPU exception.
pub const EXCEPTION_STATUS: u32 = 256;

/// Program every terminal starts with.
pub const ROOT_PROGRAM: &[u8] = b"shell";

/// Where a freshly executed program starts in user mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntry {
    pub pid: Pid,
    pub entry: VirtAddr,
    pub stack: VirtAddr,
}

/// How the architecture layer leaves the kernel after a core operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Drop to user mode at a program's entry point.
    EnterUser(UserEntry),
    /// Switch to a saved kernel context and return `value` from it.
    Resume { frame: Frame, value: i32 },
    /// Return `value` to the interrupted context.
    Return(i32),
    /// Wait for the next interrupt with the kernel unlocked, then reissue
    /// the same call.
    Retry,
    /// Abandon the current context and sleep until the scheduler moves on.
    Idle,
}

/// Kernel context owning every piece of process, terminal and mapping state.
pub struct Kernel<F, H> {
    pub(crate) fs: F,
    pub(crate) hw: H,
    pub(crate) space: AddressSpace,
    pub(crate) processes: ProcessTable,
    pub(crate) terminals: TerminalRegistry,
}

impl<F: Filesystem, H: Platform> Kernel<F, H> {
    pub fn new(fs: F, hw: H) -> Self {
        Self {
            fs,
            hw,
            space: AddressSpace::new(),
            processes: ProcessTable::new(),
            terminals: TerminalRegistry::new(),
        }
    }

    /// Builds and loads the boot page directory. Call once the context has
    /// reached its final storage.
    pub fn init(&mut self) {
        self.space.init(&self.hw);
        log::info!("kernel: page directory at {:#x}", self.space.root());
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn terminals(&self) -> &TerminalRegistry {
        &self.terminals
    }

    /// Pid at the top of the active terminal's chain.
    pub fn current_pid(&self) -> Option<Pid> {
        self.terminals.current().running
    }

    pub fn current(&self) -> Option<&Pcb> {
        self.processes.by_pid(self.current_pid()?)
    }

    /// Loads and prepares a program on the active terminal.
    ///
    /// Everything that can fail is checked before any state changes. On
    /// success the caller's frame and kernel stack are recorded in the parent
    /// and the new process becomes the terminal's running process.
    pub fn execute(&mut self, command: &[u8], caller: Frame) -> Result<UserEntry, Errno> {
        let command = parse_command(command)?;
        let dentry = self.fs.is_executable(command.name)?;
        let entry = read_entry_point(&self.fs, dentry.inode)?;
        let args = ArgBuffer::new(command.args)?;

        let terminal = self.terminals.active();
        let parent = self.terminals.current().running;
        let pid = self.processes.allocate().map_err(|err| {
            log::warn!("exec: process table full");
            err
        })?;

        self.space.map_program(pid);
        self.space.flush(&self.hw);
        if let Err(err) = load_image(&self.fs, &mut self.hw, dentry.inode) {
            log::debug!("exec: image load failed: {:?}", err);
            self.processes.release(pid);
            match parent {
                Some(parent) => self.space.map_program(parent),
                None => self.space.unmap(USER_BASE),
            }
            self.space.flush(&self.hw);
            return Err(err);
        }

        let saved = match parent.and_then(|parent| self.processes.by_pid_mut(parent)) {
            Some(pcb) => {
                pcb.saved = caller;
                pcb.kernel_stack = self.hw.kernel_stack();
                pcb.state = ProcState::Suspended;
                caller
            }
            None => {
                let slot = self.terminals.current_mut();
                slot.started = true;
                *slot.entry.get_or_insert(caller)
            }
        };

        if let Some(pcb) = self.processes.by_pid_mut(pid) {
            pcb.parent = parent;
            pcb.terminal = terminal;
            pcb.args = args;
            pcb.saved = saved;
            pcb.state = ProcState::Running;
        }
        self.hw.set_kernel_stack(kernel_stack_top(pid));
        self.space.unmap_user_video();
        self.space.flush(&self.hw);
        self.terminals.current_mut().running = Some(pid);

        log::info!(
            "exec: pid {} `{}` on terminal {} (parent {:?})",
            pid,
            core::str::from_utf8(command.name).unwrap_or("?"),
            terminal,
            parent
        );
        Ok(UserEntry {
            pid,
            entry,
            stack: USER_STACK_TOP,
        })
    }

    /// Terminates the active terminal's running process.
    ///
    /// A child hands control back to its parent's `execute` call with
    /// `status`; a root shell is replaced by a fresh one. Should that
    /// relaunch fail, the terminal is left empty with nothing mapped and the
    /// caller idles until the scheduler starts a shell there again.
    pub fn halt(&mut self, status: u32) -> Result<Transfer, Errno> {
        let terminal = self.terminals.active();
        let pid = self.current_pid().ok_or(Errno::InvalidArg)?;
        self.close_descriptors(pid);

        let parent = self.processes.by_pid(pid).and_then(|pcb| pcb.parent);
        debug_assert!(!self.processes.has_children(pid));
        self.processes.release(pid);
        self.terminals.current_mut().running = parent;
        log::info!("exit: pid {} status {}", pid, status);

        let Some(parent) = parent else {
            log::warn!("exit: base shell of terminal {} halted, relaunching", terminal);
            self.print(terminal, b"Cannot halt base shell\n");
            let entry = self.terminals.current().entry.unwrap_or_default();
            return match self.execute(ROOT_PROGRAM, entry) {
                Ok(entry) => Ok(Transfer::EnterUser(entry)),
                Err(err) => {
                    // The dying shell's page must not stay reachable; the
                    // scheduler retries the launch on a later tick.
                    log::error!("exit: terminal {} lost its shell: {:?}", terminal, err);
                    self.space.unmap(USER_BASE);
                    self.space.unmap_user_video();
                    self.space.flush(&self.hw);
                    Ok(Transfer::Idle)
                }
            };
        };

        let pcb = self.processes.by_pid_mut(parent).ok_or(Errno::InvalidArg)?;
        pcb.state = ProcState::Running;
        let (frame, kernel_stack, video_mapped) = (pcb.saved, pcb.kernel_stack, pcb.video_mapped);
        self.hw.set_kernel_stack(kernel_stack);
        self.space.map_program(parent);
        self.install_user_video(video_mapped, terminal);
        self.space.flush(&self.hw);
        Ok(Transfer::Resume {
            frame,
            value: status as i32,
        })
    }

    /// Halts the running process after a fault in user mode.
    pub fn halt_on_exception(&mut self) -> Result<Transfer, Errno> {
        self.halt(EXCEPTION_STATUS)
    }

    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize, Errno> {
        self.with_descriptor(fd, |io, desc| desc.kind.ops().read(io, desc, buf))
    }

    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize, Errno> {
        let written = self.with_descriptor(fd, |io, desc| desc.kind.ops().write(io, desc, buf))?;
        let terminal = self.current().map_or(self.terminals.active(), |pcb| pcb.terminal);
        if terminal == self.terminals.visible() {
            if let Some(slot) = self.terminals.get(terminal) {
                self.hw.set_cursor(slot.cursor);
            }
        }
        Ok(written)
    }

    /// Opens `name` in the lowest free descriptor slot.
    pub fn open(&mut self, name: &[u8]) -> Result<usize, Errno> {
        let dentry = self.fs.resolve_by_name(name)?;
        let pid = self.current_pid().ok_or(Errno::InvalidArg)?;
        let Self {
            fs,
            hw,
            processes,
            terminals,
            ..
        } = self;
        let pcb = processes.by_pid_mut(pid).ok_or(Errno::InvalidArg)?;
        let fd = pcb.files.free_slot().ok_or(Errno::NoMem)?;
        let mut desc = FileDescriptor::open(FileKind::from(dentry.file_type), dentry.inode);
        let mut io = file_io(&*fs, &mut *hw, terminals, pcb.terminal)?;
        desc.kind.ops().open(&mut io, &mut desc)?;
        pcb.files.install(fd, desc);
        log::debug!("open: pid {} fd {} -> inode {}", pid, fd, dentry.inode);
        Ok(fd)
    }

    pub fn close(&mut self, fd: usize) -> Result<(), Errno> {
        if !(FIRST_USER_FD..MAX_FILES).contains(&fd) {
            return Err(Errno::InvalidArg);
        }
        let pid = self.current_pid().ok_or(Errno::InvalidArg)?;
        let Self {
            fs,
            hw,
            processes,
            terminals,
            ..
        } = self;
        let pcb = processes.by_pid_mut(pid).ok_or(Errno::InvalidArg)?;
        let mut desc = pcb.files.release(fd).ok_or(Errno::InvalidArg)?;
        let mut io = file_io(&*fs, &mut *hw, terminals, pcb.terminal)?;
        desc.kind.ops().close(&mut io, &mut desc)
    }

    /// Copies the argument string and a terminator into `buf`.
    ///
    /// The terminator always lands inside `buf`, so at most `buf.len() - 1`
    /// bytes of text are copied. Returns the number of bytes written,
    /// terminator included.
    pub fn get_arguments(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        let pcb = self.current().ok_or(Errno::InvalidArg)?;
        if pcb.args.is_empty() || buf.is_empty() {
            return Err(Errno::InvalidArg);
        }
        let args = pcb.args.as_bytes();
        let n = args.len().min(buf.len() - 1);
        buf[..n].copy_from_slice(&args[..n]);
        buf[n] = 0;
        Ok(n + 1)
    }

    /// Maps the user video window for the running process after checking
    /// that `out`, where the caller wants the address stored, lies in its
    /// program page. Returns the window address.
    pub fn map_video(&mut self, out: VirtAddr) -> Result<VirtAddr, Errno> {
        validate_user_buffer(out, 4)?;
        let pid = self.current_pid().ok_or(Errno::InvalidArg)?;
        let pcb = self.processes.by_pid_mut(pid).ok_or(Errno::InvalidArg)?;
        pcb.video_mapped = true;
        let terminal = pcb.terminal;
        self.install_user_video(true, terminal);
        self.space.flush(&self.hw);
        Ok(USER_VIDEO)
    }

    pub fn set_handler(&mut self, _signum: u32, _handler: VirtAddr) -> Result<(), Errno> {
        Err(Errno::Unimplemented)
    }

    pub fn sigreturn(&mut self) -> Result<(), Errno> {
        Err(Errno::Unimplemented)
    }

    /// Brings `target` to the physical screen.
    pub fn switch_terminal(&mut self, target: usize) -> Result<(), Errno> {
        if target >= TERMINAL_COUNT {
            return Err(Errno::InvalidArg);
        }
        let visible = self.terminals.visible();
        if target == visible {
            return Err(Errno::Busy);
        }

        self.space.map_kernel_video(VIDEO_MEMORY);
        self.space.flush(&self.hw);
        self.hw.copy_page(terminal_page(visible), VIDEO_MEMORY);
        self.hw.copy_page(VIDEO_MEMORY, terminal_page(target));
        self.terminals.set_visible(target);
        if let Some(slot) = self.terminals.get(target) {
            self.hw.set_cursor(slot.cursor);
        }

        let active = self.terminals.active();
        self.install_kernel_video(active);
        let video_mapped = self.current().is_some_and(|pcb| pcb.video_mapped);
        self.install_user_video(video_mapped, active);
        self.space.flush(&self.hw);
        log::debug!("display: terminal {} -> {}", visible, target);
        Ok(())
    }

    /// Echoes keyboard input on the visible terminal.
    pub fn echo(&mut self, bytes: &[u8]) {
        let visible = self.terminals.visible();
        self.print(visible, bytes);
    }

    pub(crate) fn print(&mut self, terminal: usize, bytes: &[u8]) {
        let screen = self.terminals.text_page(terminal);
        let cursor = self.hw.write(terminal, screen, bytes);
        if let Some(slot) = self.terminals.get_mut(terminal) {
            slot.cursor = cursor;
        }
        if terminal == self.terminals.visible() {
            self.hw.set_cursor(cursor);
        }
    }

    pub(crate) fn install_kernel_video(&mut self, terminal: usize) {
        let page = self.terminals.display_page(terminal);
        self.space.map_kernel_video(page);
    }

    pub(crate) fn install_user_video(&mut self, mapped: bool, terminal: usize) {
        if mapped {
            let page = self.terminals.display_page(terminal);
            self.space.map_user_video(page);
        } else {
            self.space.unmap_user_video();
        }
    }

    fn with_descriptor<R>(
        &mut self,
        fd: usize,
        op: impl FnOnce(&mut FileIo<'_>, &mut FileDescriptor) -> Result<R, Errno>,
    ) -> Result<R, Errno> {
        let pid = self.current_pid().ok_or(Errno::InvalidArg)?;
        let Self {
            fs,
            hw,
            processes,
            terminals,
            ..
        } = self;
        let pcb = processes.by_pid_mut(pid).ok_or(Errno::InvalidArg)?;
        let terminal = pcb.terminal;
        let desc = pcb.files.get_mut(fd).ok_or(Errno::InvalidArg)?;
        let mut io = file_io(&*fs, &mut *hw, terminals, terminal)?;
        op(&mut io, desc)
    }

    fn close_descriptors(&mut self, pid: Pid) {
        let Self {
            fs,
            hw,
            processes,
            terminals,
            ..
        } = self;
        let Some(pcb) = processes.by_pid_mut(pid) else {
            return;
        };
        let Ok(mut io) = file_io(&*fs, &mut *hw, terminals, pcb.terminal) else {
            return;
        };
        for fd in FIRST_USER_FD..MAX_FILES {
            if let Some(mut desc) = pcb.files.release(fd) {
                if let Err(err) = desc.kind.ops().close(&mut io, &mut desc) {
                    log::debug!("exit: closing fd {} of pid {} failed: {:?}", fd, pid, err);
                }
            }
        }
    }
}

fn file_io<'a>(
    fs: &'a dyn Filesystem,
    hw: &'a mut dyn Platform,
    terminals: &'a mut TerminalRegistry,
    terminal: usize,
) -> Result<FileIo<'a>, Errno> {
    let screen = terminals.text_page(terminal);
    let slot = terminals.get_mut(terminal).ok_or(Errno::InvalidArg)?;
    Ok(FileIo {
        fs,
        hw,
        terminal,
        screen,
        cursor: &mut slot.cursor,
    })
}
