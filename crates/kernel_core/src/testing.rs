//! Host-side doubles for the hardware contracts.

use std::cell::Cell;
use std::collections::VecDeque;

use hal::{
    Console, Cursor, Display, Errno, PagingOps, PagingRoot, Rtc, TaskSegment, UserMemory,
    VirtAddr,
};

use crate::bootfs::{bootfs_size, build_bootfs, BootFsEntry};
use crate::fs::FileType;
use crate::layout::{
    ENTRY_POINT_OFFSET, EXEC_MAGIC, PAGE_SIZE, TERMINAL_COUNT, USER_BASE, USER_VIDEO,
};

const SCREEN_WIDTH: u16 = 80;

#[derive(Default)]
pub struct MockPaging {
    pub loaded_root: Cell<Option<PagingRoot>>,
    pub flushes: Cell<usize>,
}

impl PagingOps for MockPaging {
    fn load_root(&self, root: PagingRoot) {
        self.loaded_root.set(Some(root));
    }

    fn flush_tlb(&self) {
        self.flushes.set(self.flushes.get() + 1);
    }
}

pub struct MockPlatform {
    pub paging: MockPaging,
    pub kernel_stack: VirtAddr,
    pub cursor: Cursor,
    pub copies: Vec<(VirtAddr, VirtAddr)>,
    pub output: [Vec<u8>; TERMINAL_COUNT],
    pub cursors: [Cursor; TERMINAL_COUNT],
    pub screens: [Option<VirtAddr>; TERMINAL_COUNT],
    pub lines: [VecDeque<Vec<u8>>; TERMINAL_COUNT],
    pub rtc_opens: usize,
    pub rtc_ticks: usize,
    pub rtc_rate: Option<u8>,
    pub memory: Vec<u8>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            paging: MockPaging::default(),
            kernel_stack: 0,
            cursor: Cursor::default(),
            copies: Vec::new(),
            output: Default::default(),
            cursors: [Cursor::default(); TERMINAL_COUNT],
            screens: [None; TERMINAL_COUNT],
            lines: Default::default(),
            rtc_opens: 0,
            rtc_ticks: 0,
            rtc_rate: None,
            memory: vec![0; (USER_VIDEO + PAGE_SIZE - USER_BASE) as usize],
        }
    }

    pub fn push_line(&mut self, terminal: usize, line: &[u8]) {
        self.lines[terminal].push_back(line.to_vec());
    }

    pub fn user_bytes(&self, addr: VirtAddr, len: usize) -> &[u8] {
        let start = (addr - USER_BASE) as usize;
        &self.memory[start..start + len]
    }

    fn range(&self, addr: VirtAddr, len: usize) -> Result<core::ops::Range<usize>, Errno> {
        let start = addr.checked_sub(USER_BASE).ok_or(Errno::InvalidArg)? as usize;
        let end = start.checked_add(len).ok_or(Errno::InvalidArg)?;
        if end > self.memory.len() {
            return Err(Errno::InvalidArg);
        }
        Ok(start..end)
    }
}

impl PagingOps for MockPlatform {
    fn load_root(&self, root: PagingRoot) {
        self.paging.load_root(root);
    }

    fn flush_tlb(&self) {
        self.paging.flush_tlb();
    }
}

impl TaskSegment for MockPlatform {
    fn kernel_stack(&self) -> VirtAddr {
        self.kernel_stack
    }

    fn set_kernel_stack(&mut self, top: VirtAddr) {
        self.kernel_stack = top;
    }
}

impl Display for MockPlatform {
    fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    fn copy_page(&mut self, dst: VirtAddr, src: VirtAddr) {
        self.copies.push((dst, src));
    }
}

impl Console for MockPlatform {
    fn write(&mut self, terminal: usize, screen: VirtAddr, bytes: &[u8]) -> Cursor {
        self.output[terminal].extend_from_slice(bytes);
        self.screens[terminal] = Some(screen);
        let cursor = &mut self.cursors[terminal];
        for &byte in bytes {
            if byte == b'\n' || cursor.x + 1 >= SCREEN_WIDTH {
                cursor.x = 0;
                cursor.y += 1;
            } else {
                cursor.x += 1;
            }
        }
        *cursor
    }

    fn poll_line(&mut self, terminal: usize, buf: &mut [u8]) -> Option<usize> {
        let line = self.lines[terminal].pop_front()?;
        let n = line.len().min(buf.len());
        buf[..n].copy_from_slice(&line[..n]);
        Some(n)
    }
}

impl Rtc for MockPlatform {
    fn open(&mut self) {
        self.rtc_opens += 1;
    }

    fn poll_tick(&mut self) -> bool {
        if self.rtc_ticks == 0 {
            return false;
        }
        self.rtc_ticks -= 1;
        true
    }

    fn set_rate(&mut self, rate: u8) {
        self.rtc_rate = Some(rate);
    }
}

impl UserMemory for MockPlatform {
    fn copy_from_user(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), Errno> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }

    fn copy_to_user(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), Errno> {
        let range = self.range(addr, data.len())?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }
}

/// Serializes `entries` into a fresh boot filesystem image.
pub fn build_image(entries: &[BootFsEntry<'_>]) -> Vec<u8> {
    let mut image = vec![0u8; bootfs_size(entries)];
    build_bootfs(entries, &mut image).expect("test image should build");
    image
}

/// Builds an executable of `len` bytes with the given entry point.
pub fn program(entry: VirtAddr, len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| (i % 239) as u8).collect();
    data[..EXEC_MAGIC.len()].copy_from_slice(&EXEC_MAGIC);
    let offset = ENTRY_POINT_OFFSET as usize;
    data[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
    data
}

/// Entry point of every program in `sample_image`.
pub const SAMPLE_ENTRY: VirtAddr = 0x0804_8094;

/// Boot image with the usual set of programs and files.
pub fn sample_image() -> Vec<u8> {
    let shell = program(SAMPLE_ENTRY, 5000);
    let ls = program(SAMPLE_ENTRY, 600);
    let counter = program(SAMPLE_ENTRY, 300);
    build_image(&[
        BootFsEntry {
            name: ".",
            file_type: FileType::Directory,
            data: &[],
        },
        BootFsEntry {
            name: "rtc",
            file_type: FileType::Rtc,
            data: &[],
        },
        BootFsEntry {
            name: "shell",
            file_type: FileType::Regular,
            data: &shell,
        },
        BootFsEntry {
            name: "ls",
            file_type: FileType::Regular,
            data: &ls,
        },
        BootFsEntry {
            name: "counter",
            file_type: FileType::Regular,
            data: &counter,
        },
        BootFsEntry {
            name: "frame0.txt",
            file_type: FileType::Regular,
            data: b"/\\/\\/\\ fish\n",
        },
        BootFsEntry {
            name: "fake",
            file_type: FileType::Regular,
            data: b"not a program at all",
        },
    ])
}
