use hal::Errno;

use crate::fs::{Dentry, FileType, Filesystem};
use crate::layout::MAX_NAME;

/// Size of every block in the image.
pub const BLOCK_SIZE: usize = 4096;
/// Size of one directory entry.
pub const DENTRY_SIZE: usize = 64;
/// Directory entries that fit in the boot block after its 64-byte header.
pub const MAX_DENTRIES: usize = (BLOCK_SIZE - DENTRY_SIZE) / DENTRY_SIZE;
/// Data block indices that fit in one inode block.
pub const MAX_INODE_BLOCKS: usize = (BLOCK_SIZE - 4) / 4;

/// A file to place in a boot filesystem image.
#[derive(Debug, Clone, Copy)]
pub struct BootFsEntry<'a> {
    pub name: &'a str,
    pub file_type: FileType,
    pub data: &'a [u8],
}

/// Read-only view of a boot filesystem image: one boot block, then one
/// block per inode, then the data blocks.
#[derive(Debug, Clone, Copy)]
pub struct BootFs<'a> {
    image: &'a [u8],
    dentry_count: usize,
    inode_count: usize,
    block_count: usize,
}

impl<'a> BootFs<'a> {
    /// Validates the boot block and wraps the image.
    pub fn parse(image: &'a [u8]) -> Result<Self, Errno> {
        if image.len() < BLOCK_SIZE {
            return Err(Errno::InvalidArg);
        }
        let dentry_count = read_u32(image, 0) as usize;
        let inode_count = read_u32(image, 4) as usize;
        let block_count = read_u32(image, 8) as usize;
        if dentry_count > MAX_DENTRIES {
            return Err(Errno::InvalidArg);
        }
        let blocks = 1usize
            .checked_add(inode_count)
            .and_then(|n| n.checked_add(block_count))
            .ok_or(Errno::InvalidArg)?;
        if blocks.checked_mul(BLOCK_SIZE).map_or(true, |size| size > image.len()) {
            return Err(Errno::InvalidArg);
        }
        Ok(Self {
            image,
            dentry_count,
            inode_count,
            block_count,
        })
    }

    pub fn dentry_count(&self) -> usize {
        self.dentry_count
    }

    fn inode_base(&self, inode: u32) -> Result<usize, Errno> {
        let inode = inode as usize;
        if inode >= self.inode_count {
            return Err(Errno::InvalidArg);
        }
        Ok((1 + inode) * BLOCK_SIZE)
    }

    fn data_block(&self, index: u32) -> Result<&'a [u8], Errno> {
        let index = index as usize;
        if index >= self.block_count {
            return Err(Errno::InvalidArg);
        }
        let start = (1 + self.inode_count + index) * BLOCK_SIZE;
        Ok(&self.image[start..start + BLOCK_SIZE])
    }
}

impl Filesystem for BootFs<'_> {
    fn resolve_by_name(&self, name: &[u8]) -> Result<Dentry, Errno> {
        if name.is_empty() || name.len() > MAX_NAME {
            return Err(Errno::NotFound);
        }
        let mut padded = [0u8; MAX_NAME];
        padded[..name.len()].copy_from_slice(name);
        for index in 0..self.dentry_count {
            let base = DENTRY_SIZE + index * DENTRY_SIZE;
            if self.image[base..base + MAX_NAME] == padded {
                return self.resolve_by_index(index as u32);
            }
        }
        Err(Errno::NotFound)
    }

    fn resolve_by_index(&self, index: u32) -> Result<Dentry, Errno> {
        let index = index as usize;
        if index >= self.dentry_count {
            return Err(Errno::NotFound);
        }
        let base = DENTRY_SIZE + index * DENTRY_SIZE;
        let file_type = FileType::from_raw(read_u32(self.image, base + MAX_NAME))
            .ok_or(Errno::InvalidArg)?;
        let inode = read_u32(self.image, base + MAX_NAME + 4);
        if inode as usize >= self.inode_count {
            return Err(Errno::InvalidArg);
        }
        let mut name = [0u8; MAX_NAME];
        name.copy_from_slice(&self.image[base..base + MAX_NAME]);
        Ok(Dentry {
            name,
            file_type,
            inode,
        })
    }

    fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, Errno> {
        let base = self.inode_base(inode)?;
        let len = read_u32(self.image, base) as usize;
        let offset = offset as usize;
        if offset >= len {
            return Ok(0);
        }
        let total = buf.len().min(len - offset);
        let mut copied = 0;
        while copied < total {
            let position = offset + copied;
            let slot = position / BLOCK_SIZE;
            if slot >= MAX_INODE_BLOCKS {
                return Err(Errno::InvalidArg);
            }
            let block = self.data_block(read_u32(self.image, base + 4 + slot * 4))?;
            let within = position % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(total - copied);
            buf[copied..copied + chunk].copy_from_slice(&block[within..within + chunk]);
            copied += chunk;
        }
        Ok(copied)
    }
}

/// Returns the image size `build_bootfs` needs for `entries`.
pub fn bootfs_size(entries: &[BootFsEntry<'_>]) -> usize {
    let data_blocks: usize = entries.iter().map(|entry| blocks_for(entry.data.len())).sum();
    (1 + entries.len() + data_blocks) * BLOCK_SIZE
}

/// Serializes entries into `out`, giving each entry its own inode and
/// contiguous data blocks. Returns the number of bytes written.
pub fn build_bootfs(entries: &[BootFsEntry<'_>], out: &mut [u8]) -> Result<usize, Errno> {
    let size = bootfs_size(entries);
    if entries.len() > MAX_DENTRIES || out.len() < size {
        return Err(Errno::InvalidArg);
    }
    let out = &mut out[..size];
    out.fill(0);

    let inode_count = entries.len();
    let block_count = (size / BLOCK_SIZE) - 1 - inode_count;
    write_u32(out, 0, entries.len() as u32);
    write_u32(out, 4, inode_count as u32);
    write_u32(out, 8, block_count as u32);

    let mut next_block = 0usize;
    for (index, entry) in entries.iter().enumerate() {
        let name = entry.name.as_bytes();
        if name.is_empty() || name.len() > MAX_NAME {
            return Err(Errno::InvalidArg);
        }
        let blocks = blocks_for(entry.data.len());
        if blocks > MAX_INODE_BLOCKS {
            return Err(Errno::InvalidArg);
        }

        let dentry = DENTRY_SIZE + index * DENTRY_SIZE;
        out[dentry..dentry + name.len()].copy_from_slice(name);
        write_u32(out, dentry + MAX_NAME, entry.file_type.as_raw());
        write_u32(out, dentry + MAX_NAME + 4, index as u32);

        let inode = (1 + index) * BLOCK_SIZE;
        write_u32(out, inode, entry.data.len() as u32);
        for (slot, chunk) in entry.data.chunks(BLOCK_SIZE).enumerate() {
            let block = next_block + slot;
            write_u32(out, inode + 4 + slot * 4, block as u32);
            let start = (1 + inode_count + block) * BLOCK_SIZE;
            out[start..start + chunk.len()].copy_from_slice(chunk);
        }
        next_block += blocks;
    }

    Ok(size)
}

fn blocks_for(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
