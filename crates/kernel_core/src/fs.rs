use hal::Errno;

use crate::layout::{EXEC_MAGIC, MAX_NAME};

/// File types stored in directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Rtc,
    Directory,
    Regular,
}

impl FileType {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FileType::Rtc),
            1 => Some(FileType::Directory),
            2 => Some(FileType::Regular),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> u32 {
        match self {
            FileType::Rtc => 0,
            FileType::Directory => 1,
            FileType::Regular => 2,
        }
    }
}

/// A resolved directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dentry {
    pub name: [u8; MAX_NAME],
    pub file_type: FileType,
    pub inode: u32,
}

impl Dentry {
    /// Returns the name without its zero padding.
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        &self.name[..len]
    }
}

/// Read-only filesystem contract used by the syscall layer.
pub trait Filesystem {
    fn resolve_by_name(&self, name: &[u8]) -> Result<Dentry, Errno>;

    fn resolve_by_index(&self, index: u32) -> Result<Dentry, Errno>;

    /// Copies file data starting at `offset`; returns 0 at or past the end.
    fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, Errno>;

    /// Resolves `name` and checks that it is a regular file starting with the
    /// executable magic.
    fn is_executable(&self, name: &[u8]) -> Result<Dentry, Errno> {
        let dentry = self.resolve_by_name(name)?;
        if dentry.file_type != FileType::Regular {
            return Err(Errno::NotExecutable);
        }
        let mut magic = [0u8; EXEC_MAGIC.len()];
        if self.read(dentry.inode, 0, &mut magic)? != magic.len() || magic != EXEC_MAGIC {
            return Err(Errno::NotExecutable);
        }
        Ok(dentry)
    }
}
