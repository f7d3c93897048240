use hal::{PageFlags, PagingOps, PagingRoot, PhysAddr, VirtAddr};

use crate::layout::{
    program_frame, terminal_page, HUGE_PAGE_SIZE, KERNEL_BASE, PAGE_SIZE, SCREEN_ALIAS,
    TABLE_ENTRIES, TERMINAL_COUNT, USER_BASE, USER_VIDEO, VIDEO_MEMORY,
};

const BASE_MASK: u32 = 0xFFFF_F000;
const DIRECTORY_SHIFT: u32 = 22;
const TABLE_SHIFT: u32 = 12;

/// Granularity of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Small,
    Huge,
}

impl PageSize {
    pub const fn bytes(self) -> u32 {
        match self {
            PageSize::Small => PAGE_SIZE,
            PageSize::Huge => HUGE_PAGE_SIZE,
        }
    }
}

/// Privilege level allowed to touch a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Kernel,
    User,
}

/// A packed page-directory or page-table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    pub const EMPTY: Self = Self(0);

    pub const fn new(base: PhysAddr, flags: PageFlags) -> Self {
        Self((base & BASE_MASK) | flags.bits())
    }

    pub const fn base(self) -> PhysAddr {
        self.0 & BASE_MASK
    }

    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits(self.0)
    }

    pub const fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    pub const fn is_huge(self) -> bool {
        self.flags().contains(PageFlags::HUGE)
    }

    fn clear_present(&mut self) {
        *self = Self::new(self.base(), self.flags().difference(PageFlags::PRESENT));
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [Entry; TABLE_ENTRIES],
}

impl PageTable {
    const fn new() -> Self {
        Self {
            entries: [Entry::EMPTY; TABLE_ENTRIES],
        }
    }

    fn clear_present(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.clear_present();
        }
    }

    fn phys(&self) -> PhysAddr {
        // The kernel image is identity mapped, so a table's address is its
        // physical address.
        self as *const PageTable as usize as PhysAddr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableId {
    Kernel,
    User,
}

impl TableId {
    const fn for_scope(scope: Scope) -> Self {
        match scope {
            Scope::Kernel => TableId::Kernel,
            Scope::User => TableId::User,
        }
    }

    const fn index(self) -> usize {
        match self {
            TableId::Kernel => 0,
            TableId::User => 1,
        }
    }
}

/// The system page directory with its kernel and user page tables.
///
/// Slot 0 maps the low 4 MB in small pages through the kernel table (video
/// memory and terminal backing pages), slot 1 identity maps the kernel with
/// one huge page, slot 32 holds the program page of the scheduled process and
/// the user table backs the video window right after it.
#[repr(C)]
pub struct AddressSpace {
    directory: PageTable,
    tables: [PageTable; 2],
    bound: [Option<usize>; 2],
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    /// Creates a directory with nothing present.
    pub const fn new() -> Self {
        Self {
            directory: PageTable::new(),
            tables: [PageTable::new(), PageTable::new()],
            bound: [None, None],
        }
    }

    /// Builds the boot mappings and loads the directory.
    ///
    /// Must run once the address space has reached its final location, since
    /// directory entries record the tables' addresses.
    pub fn init<P: PagingOps>(&mut self, paging: &P) {
        *self = Self::new();
        self.map(VIDEO_MEMORY, VIDEO_MEMORY, PageSize::Small, Scope::Kernel);
        self.map(SCREEN_ALIAS, VIDEO_MEMORY, PageSize::Small, Scope::Kernel);
        for terminal in 0..TERMINAL_COUNT {
            let page = terminal_page(terminal);
            self.map(page, page, PageSize::Small, Scope::Kernel);
        }
        self.map(KERNEL_BASE, KERNEL_BASE, PageSize::Huge, Scope::Kernel);
        let slot = slot_of(KERNEL_BASE);
        let kernel = self.directory.entries[slot];
        self.directory.entries[slot] = Entry::new(kernel.base(), kernel.flags().union(PageFlags::GLOBAL));
        paging.load_root(self.root());
    }

    /// Physical address of the page directory.
    pub fn root(&self) -> PagingRoot {
        self.directory.phys()
    }

    /// Installs a present, writable translation, overwriting whatever the
    /// slot held before.
    pub fn map(&mut self, virt: VirtAddr, phys: PhysAddr, size: PageSize, scope: Scope) {
        let slot = slot_of(virt);
        let flags = entry_flags(scope);
        match size {
            PageSize::Huge => {
                self.release_slot(slot);
                self.directory.entries[slot] = Entry::new(phys, flags.union(PageFlags::HUGE));
            }
            PageSize::Small => {
                let id = TableId::for_scope(scope);
                self.bind(id, slot);
                let table = &mut self.tables[id.index()];
                table.entries[table_index(virt)] = Entry::new(phys, flags);
                let table_phys = table.phys();
                self.directory.entries[slot] = Entry::new(table_phys, flags);
            }
        }
        log::trace!("paging: map {:#x} -> {:#x} ({:?}, {:?})", virt, phys, size, scope);
    }

    /// Clears the directory slot holding `virt` and every page of the table
    /// it pointed to.
    pub fn unmap(&mut self, virt: VirtAddr) {
        let slot = slot_of(virt);
        let entry = self.directory.entries[slot];
        if !entry.is_present() {
            return;
        }
        if !entry.is_huge() {
            if let Some(id) = self.table_at(slot) {
                self.tables[id.index()].clear_present();
                self.bound[id.index()] = None;
            }
        }
        self.directory.entries[slot].clear_present();
        log::trace!("paging: unmap slot {}", slot);
    }

    /// Invalidates all cached translations.
    pub fn flush<P: PagingOps>(&self, paging: &P) {
        paging.flush_tlb();
    }

    /// Maps the program page of `pid` at the user base.
    pub fn map_program(&mut self, pid: u32) {
        self.map(USER_BASE, program_frame(pid), PageSize::Huge, Scope::User);
    }

    /// Points the kernel video window at `phys`.
    pub fn map_kernel_video(&mut self, phys: PhysAddr) {
        self.map(VIDEO_MEMORY, phys, PageSize::Small, Scope::Kernel);
    }

    /// Points the user video window at `phys`.
    pub fn map_user_video(&mut self, phys: PhysAddr) {
        self.map(USER_VIDEO, phys, PageSize::Small, Scope::User);
    }

    pub fn unmap_user_video(&mut self) {
        self.unmap(USER_VIDEO);
    }

    /// Returns the directory entry covering `virt`.
    pub fn directory_entry(&self, virt: VirtAddr) -> Entry {
        self.directory.entries[slot_of(virt)]
    }

    /// Walks the directory and returns the physical address and the effective
    /// flags for `virt`.
    pub fn translate(&self, virt: VirtAddr) -> Option<(PhysAddr, PageFlags)> {
        let slot = slot_of(virt);
        let dir = self.directory.entries[slot];
        if !dir.is_present() {
            return None;
        }
        if dir.is_huge() {
            return Some((dir.base() | (virt & (HUGE_PAGE_SIZE - 1)), dir.flags()));
        }
        let id = self.table_at(slot)?;
        let page = self.tables[id.index()].entries[table_index(virt)];
        if !page.is_present() {
            return None;
        }
        Some((page.base() | (virt & (PAGE_SIZE - 1)), page.flags()))
    }

    fn table_at(&self, slot: usize) -> Option<TableId> {
        [TableId::Kernel, TableId::User]
            .into_iter()
            .find(|id| self.bound[id.index()] == Some(slot))
    }

    fn bind(&mut self, id: TableId, slot: usize) {
        if self.bound[id.index()] == Some(slot) {
            return;
        }
        if let Some(old) = self.bound[id.index()] {
            self.directory.entries[old].clear_present();
        }
        self.release_slot(slot);
        self.tables[id.index()].clear_present();
        self.bound[id.index()] = Some(slot);
    }

    fn release_slot(&mut self, slot: usize) {
        if let Some(id) = self.table_at(slot) {
            self.bound[id.index()] = None;
        }
    }
}

const fn slot_of(virt: VirtAddr) -> usize {
    (virt >> DIRECTORY_SHIFT) as usize
}

const fn table_index(virt: VirtAddr) -> usize {
    ((virt >> TABLE_SHIFT) as usize) & (TABLE_ENTRIES - 1)
}

const fn entry_flags(scope: Scope) -> PageFlags {
    let flags = PageFlags::PRESENT.union(PageFlags::WRITE);
    match scope {
        Scope::Kernel => flags,
        Scope::User => flags.union(PageFlags::USER),
    }
}
