#![cfg_attr(not(test), no_std)]

pub mod bootfs;
pub mod exec;
pub mod file;
pub mod fs;
pub mod kernel;
pub mod layout;
pub mod paging;
pub mod process;
pub mod scheduler;
pub mod syscall;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use bootfs::{bootfs_size, build_bootfs, BootFs, BootFsEntry};
pub use exec::{parse_command, Command};
pub use file::{FileDescriptor, FileKind, FileOps, FdTable};
pub use fs::{Dentry, FileType, Filesystem};
pub use hal::Errno;
pub use hal::PageFlags;
pub use kernel::{Kernel, Transfer, UserEntry, EXCEPTION_STATUS, ROOT_PROGRAM};
pub use layout::validate_user_buffer;
pub use paging::{AddressSpace, PageSize, Scope};
pub use process::{ArgBuffer, Frame, Pcb, Pid, ProcState, ProcessTable};
pub use syscall::{dispatch, Syscall};
pub use terminal::{Terminal, TerminalRegistry};
