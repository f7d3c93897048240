use hal::{Errno, VirtAddr};

use crate::file::{FileDescriptor, FileKind, FdTable};
use crate::layout::{kernel_stack_top, MAX_ARGS, MAX_PROCESSES};

/// Process identifier; doubles as the index into the process table.
pub type Pid = u32;

/// Process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Created,
    Running,
    Suspended,
}

/// Kernel stack and frame pointers captured when a process is switched away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame {
    pub esp: VirtAddr,
    pub ebp: VirtAddr,
}

/// Fixed-size, NUL-free argument string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgBuffer {
    bytes: [u8; MAX_ARGS],
    len: usize,
}

impl ArgBuffer {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; MAX_ARGS],
            len: 0,
        }
    }

    /// Builds an argument buffer, rejecting strings that do not fit together
    /// with their terminator.
    pub fn new(args: &[u8]) -> Result<Self, Errno> {
        if args.len() >= MAX_ARGS {
            return Err(Errno::InvalidArg);
        }
        let mut buffer = Self::empty();
        buffer.bytes[..args.len()].copy_from_slice(args);
        buffer.len = args.len();
        Ok(buffer)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Process control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcb {
    pub pid: Pid,
    pub state: ProcState,
    pub parent: Option<Pid>,
    pub terminal: usize,
    pub files: FdTable,
    pub saved: Frame,
    pub kernel_stack: VirtAddr,
    pub args: ArgBuffer,
    pub video_mapped: bool,
}

impl Pcb {
    /// Creates a zeroed control block with the standard streams open.
    pub fn new(pid: Pid) -> Self {
        let mut files = FdTable::new();
        files.install(0, FileDescriptor::open(FileKind::Stdin, 0));
        files.install(1, FileDescriptor::open(FileKind::Stdout, 0));
        Self {
            pid,
            state: ProcState::Created,
            parent: None,
            terminal: 0,
            files,
            saved: Frame::default(),
            kernel_stack: kernel_stack_top(pid),
            args: ArgBuffer::empty(),
            video_mapped: false,
        }
    }
}

/// Fixed-capacity arena of control blocks indexed by pid.
#[derive(Debug)]
pub struct ProcessTable {
    slots: [Option<Pcb>; MAX_PROCESSES],
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub const fn new() -> Self {
        const EMPTY: Option<Pcb> = None;
        Self {
            slots: [EMPTY; MAX_PROCESSES],
        }
    }

    /// Returns the lowest pid that `allocate` would hand out.
    pub fn next_free(&self) -> Option<Pid> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|index| index as Pid)
    }

    /// Claims the lowest free pid and installs a fresh control block.
    pub fn allocate(&mut self) -> Result<Pid, Errno> {
        let pid = self.next_free().ok_or(Errno::NoMem)?;
        self.slots[pid as usize] = Some(Pcb::new(pid));
        Ok(pid)
    }

    /// Returns the pid to the free list.
    pub fn release(&mut self, pid: Pid) {
        if let Some(slot) = self.slots.get_mut(pid as usize) {
            *slot = None;
        }
    }

    pub fn by_pid(&self, pid: Pid) -> Option<&Pcb> {
        self.slots.get(pid as usize)?.as_ref()
    }

    pub fn by_pid_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots.get_mut(pid as usize)?.as_mut()
    }

    /// Returns true if any active process names `pid` as its parent.
    pub fn has_children(&self, pid: Pid) -> bool {
        self.iter().any(|pcb| pcb.parent == Some(pid))
    }

    pub fn active_count(&self) -> usize {
        self.iter().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().flatten()
    }
}
