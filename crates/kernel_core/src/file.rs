use hal::{Cursor, Errno, Platform, VirtAddr};

use crate::fs::{FileType, Filesystem};
use crate::layout::{FIRST_USER_FD, MAX_FILES, MAX_NAME};

/// Kind of object behind a descriptor; selects its operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Rtc,
    Stdin,
    Stdout,
}

impl From<FileType> for FileKind {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::Regular => FileKind::Regular,
            FileType::Directory => FileKind::Directory,
            FileType::Rtc => FileKind::Rtc,
        }
    }
}

impl FileKind {
    pub fn ops(self) -> &'static dyn FileOps {
        match self {
            FileKind::Regular => &RegularFile,
            FileKind::Directory => &DirectoryFile,
            FileKind::Rtc => &RtcFile,
            FileKind::Stdin => &StdinFile,
            FileKind::Stdout => &StdoutFile,
        }
    }
}

/// An open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub kind: FileKind,
    pub inode: u32,
    pub position: u32,
}

impl FileDescriptor {
    pub const fn open(kind: FileKind, inode: u32) -> Self {
        Self {
            kind,
            inode,
            position: 0,
        }
    }
}

/// Per-process descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdTable {
    entries: [Option<FileDescriptor>; MAX_FILES],
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_FILES],
        }
    }

    pub fn install(&mut self, fd: usize, desc: FileDescriptor) {
        if let Some(slot) = self.entries.get_mut(fd) {
            *slot = Some(desc);
        }
    }

    /// Returns the descriptor if `fd` is in range and open.
    pub fn get(&self, fd: usize) -> Option<&FileDescriptor> {
        self.entries.get(fd)?.as_ref()
    }

    pub fn get_mut(&mut self, fd: usize) -> Option<&mut FileDescriptor> {
        self.entries.get_mut(fd)?.as_mut()
    }

    /// Lowest unused descriptor above the standard streams.
    pub fn free_slot(&self) -> Option<usize> {
        (FIRST_USER_FD..MAX_FILES).find(|&fd| self.entries[fd].is_none())
    }

    pub fn release(&mut self, fd: usize) -> Option<FileDescriptor> {
        self.entries.get_mut(fd)?.take()
    }
}

/// Collaborators a file operation may touch.
pub struct FileIo<'a> {
    pub fs: &'a dyn Filesystem,
    pub hw: &'a mut dyn Platform,
    /// Terminal of the calling process.
    pub terminal: usize,
    /// Page that terminal's text currently lives in.
    pub screen: VirtAddr,
    /// Saved cursor of that terminal.
    pub cursor: &'a mut Cursor,
}

/// Operations table shared by every descriptor of one kind.
pub trait FileOps: Sync {
    fn open(&self, io: &mut FileIo<'_>, desc: &mut FileDescriptor) -> Result<(), Errno>;
    fn close(&self, io: &mut FileIo<'_>, desc: &mut FileDescriptor) -> Result<(), Errno>;
    fn read(
        &self,
        io: &mut FileIo<'_>,
        desc: &mut FileDescriptor,
        buf: &mut [u8],
    ) -> Result<usize, Errno>;
    fn write(
        &self,
        io: &mut FileIo<'_>,
        desc: &mut FileDescriptor,
        buf: &[u8],
    ) -> Result<usize, Errno>;
}

pub struct RegularFile;

impl FileOps for RegularFile {
    fn open(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Ok(())
    }

    fn close(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Ok(())
    }

    fn read(
        &self,
        io: &mut FileIo<'_>,
        desc: &mut FileDescriptor,
        buf: &mut [u8],
    ) -> Result<usize, Errno> {
        let n = io.fs.read(desc.inode, desc.position, buf)?;
        desc.position = desc.position.saturating_add(n as u32);
        Ok(n)
    }

    fn write(
        &self,
        _io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        _buf: &[u8],
    ) -> Result<usize, Errno> {
        Err(Errno::NoPerm)
    }
}

/// Directory reads walk the dentries by index, one name per call.
pub struct DirectoryFile;

impl FileOps for DirectoryFile {
    fn open(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Ok(())
    }

    fn close(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Ok(())
    }

    fn read(
        &self,
        io: &mut FileIo<'_>,
        desc: &mut FileDescriptor,
        buf: &mut [u8],
    ) -> Result<usize, Errno> {
        let dentry = match io.fs.resolve_by_index(desc.position) {
            Ok(dentry) => dentry,
            Err(Errno::NotFound) => return Ok(0),
            Err(err) => return Err(err),
        };
        let name = dentry.name();
        let n = name.len().min(buf.len()).min(MAX_NAME);
        buf[..n].copy_from_slice(&name[..n]);
        desc.position += 1;
        Ok(n)
    }

    fn write(
        &self,
        _io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        _buf: &[u8],
    ) -> Result<usize, Errno> {
        Err(Errno::NoPerm)
    }
}

pub struct RtcFile;

impl FileOps for RtcFile {
    fn open(&self, io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        io.hw.open();
        Ok(())
    }

    fn close(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Ok(())
    }

    fn read(
        &self,
        io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        _buf: &mut [u8],
    ) -> Result<usize, Errno> {
        if io.hw.poll_tick() {
            Ok(0)
        } else {
            Err(Errno::WouldBlock)
        }
    }

    fn write(
        &self,
        io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        buf: &[u8],
    ) -> Result<usize, Errno> {
        let bytes: [u8; 4] = buf.try_into().map_err(|_| Errno::InvalidArg)?;
        let rate = rtc_rate(i32::from_le_bytes(bytes)).ok_or(Errno::InvalidArg)?;
        io.hw.set_rate(rate);
        Ok(0)
    }
}

/// Maps a power-of-two frequency in 2..=1024 Hz to the RTC rate selector.
pub fn rtc_rate(freq: i32) -> Option<u8> {
    if !(2..=1024).contains(&freq) || freq.count_ones() != 1 {
        return None;
    }
    Some(16 - freq.trailing_zeros() as u8)
}

pub struct StdinFile;

impl FileOps for StdinFile {
    fn open(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Err(Errno::InvalidArg)
    }

    fn close(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Err(Errno::InvalidArg)
    }

    fn read(
        &self,
        io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        buf: &mut [u8],
    ) -> Result<usize, Errno> {
        // An empty read must not swallow a completed line.
        if buf.is_empty() {
            return Ok(0);
        }
        io.hw.poll_line(io.terminal, buf).ok_or(Errno::WouldBlock)
    }

    fn write(
        &self,
        _io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        _buf: &[u8],
    ) -> Result<usize, Errno> {
        Err(Errno::InvalidArg)
    }
}

pub struct StdoutFile;

impl FileOps for StdoutFile {
    fn open(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Err(Errno::InvalidArg)
    }

    fn close(&self, _io: &mut FileIo<'_>, _desc: &mut FileDescriptor) -> Result<(), Errno> {
        Err(Errno::InvalidArg)
    }

    fn read(
        &self,
        _io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        _buf: &mut [u8],
    ) -> Result<usize, Errno> {
        Err(Errno::InvalidArg)
    }

    fn write(
        &self,
        io: &mut FileIo<'_>,
        _desc: &mut FileDescriptor,
        buf: &[u8],
    ) -> Result<usize, Errno> {
        *io.cursor = io.hw.write(io.terminal, io.screen, buf);
        Ok(buf.len())
    }
}
