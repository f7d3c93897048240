use hal::{Errno, UserMemory, VirtAddr};

use crate::fs::Filesystem;
use crate::layout::{ENTRY_POINT_OFFSET, MAX_IMAGE_SIZE, MAX_NAME, USER_IMAGE};

/// Chunk size used when copying an image into the program page.
const LOAD_CHUNK: usize = 512;

/// A command line split into program name and argument text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a [u8],
    pub args: &'a [u8],
}

/// Splits a command at the first space after the program name.
///
/// Leading spaces before the name and before the arguments are skipped; the
/// command ends at the first NUL, if any.
pub fn parse_command(command: &[u8]) -> Result<Command<'_>, Errno> {
    let end = command.iter().position(|&b| b == 0).unwrap_or(command.len());
    let rest = trim_leading_spaces(&command[..end]);
    let name_len = rest.iter().position(|&b| b == b' ').unwrap_or(rest.len());
    if name_len == 0 || name_len > MAX_NAME {
        return Err(Errno::InvalidArg);
    }
    Ok(Command {
        name: &rest[..name_len],
        args: trim_leading_spaces(&rest[name_len..]),
    })
}

fn trim_leading_spaces(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ').unwrap_or(bytes.len());
    &bytes[start..]
}

/// Reads the little-endian entry point stored in the executable header.
pub fn read_entry_point<F: Filesystem + ?Sized>(fs: &F, inode: u32) -> Result<VirtAddr, Errno> {
    let mut entry = [0u8; 4];
    if fs.read(inode, ENTRY_POINT_OFFSET, &mut entry)? != entry.len() {
        return Err(Errno::NotExecutable);
    }
    Ok(u32::from_le_bytes(entry))
}

/// Copies the executable behind `inode` to the load address through the
/// currently installed program mapping. Returns the number of bytes copied.
pub fn load_image<F, M>(fs: &F, mem: &mut M, inode: u32) -> Result<usize, Errno>
where
    F: Filesystem + ?Sized,
    M: UserMemory + ?Sized,
{
    let mut chunk = [0u8; LOAD_CHUNK];
    let mut loaded = 0usize;
    while loaded < MAX_IMAGE_SIZE {
        let want = LOAD_CHUNK.min(MAX_IMAGE_SIZE - loaded);
        let n = fs.read(inode, loaded as u32, &mut chunk[..want])?;
        if n == 0 {
            break;
        }
        mem.copy_to_user(USER_IMAGE + loaded as u32, &chunk[..n])?;
        loaded += n;
    }
    log::trace!("exec: loaded {} bytes from inode {}", loaded, inode);
    Ok(loaded)
}
