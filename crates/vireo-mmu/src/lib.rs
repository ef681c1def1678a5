//! Virtual → physical address translation for the vireo machine.
//!
//! The machine uses 256-byte pages and two independent addressing modes:
//!
//! - **Legacy 16-bit mode**: a single flat table of 256 entries indexed by
//!   the high byte of the address. No permission enforcement; every valid
//!   page is readable, writable and executable.
//! - **Protected 32-bit mode**: a three-level walk (directory pointer →
//!   table pointer → entry) through a direct-mapped translation cache, with
//!   per-page read/write/execute bits and a privileged-page flag checked
//!   against the supervisor flag.
//!
//! The unit owns no processor state: the table root and privilege mode
//! arrive as an explicit [`ProcessorState`], and table memory is read
//! through the [`MemoryBus`] trait. Faults are ordinary return values. The
//! only mutation a resolution performs is filling the translation cache
//! after a successful walk; invalidating or evicting cache slots is the
//! table owner's job, through [`Mmu::invalidate_page`] / [`Mmu::flush_cache`].

pub mod pte;
mod tlb;

use thiserror::Error;
use tlb::{cache_index, cache_tag, Tlb};
use tracing::trace;

/// Physical memory access used for page-table walking.
///
/// This is intentionally minimal; table structures are arrays of 32-bit
/// words, so word access is all the walk needs. Reads take `&mut self`
/// because a bus read may have side effects in a hosting machine model.
/// `write_u32` exists for the collaborator that builds tables; resolutions
/// never write through the bus.
pub trait MemoryBus {
    fn read_u32(&mut self, paddr: u32) -> u32;
    fn write_u32(&mut self, paddr: u32, value: u32);
}

impl<T: MemoryBus + ?Sized> MemoryBus for &mut T {
    #[inline]
    fn read_u32(&mut self, paddr: u32) -> u32 {
        <T as MemoryBus>::read_u32(&mut **self, paddr)
    }

    #[inline]
    fn write_u32(&mut self, paddr: u32, value: u32) {
        <T as MemoryBus>::write_u32(&mut **self, paddr, value)
    }
}

/// Value returned for reads the bus cannot satisfy (open bus).
pub const OPEN_BUS: u32 = 0xffff_ffff;

/// Enable use of [`vireo_mem::Arena`] as the page-walk backend.
///
/// Out-of-range or misaligned reads return [`OPEN_BUS`]; stray writes are
/// ignored.
impl MemoryBus for vireo_mem::Arena {
    #[inline]
    fn read_u32(&mut self, paddr: u32) -> u32 {
        self.try_read_u32(paddr).unwrap_or(OPEN_BUS)
    }

    #[inline]
    fn write_u32(&mut self, paddr: u32, value: u32) {
        let _ = self.try_write_u32(paddr, value);
    }
}

/// Type of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

/// A failed resolution.
///
/// Both variants are ordinary values, reported verbatim to the caller; the
/// resolver never falls back to a default mapping. Validity is checked
/// strictly before permissions, so [`Fault::Protection`] is only ever
/// produced for an entry whose valid bit was confirmed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// No valid mapping at some level of the walk. Carries the virtual page
    /// number that failed to resolve.
    #[error("page fault: no valid mapping for vpn {vpn:#08x}")]
    Page { vpn: u32 },
    /// A mapping exists but the requested access kind or privilege level is
    /// disallowed. Carries the raw offending entry.
    #[error("protection fault: entry {entry:#010x} denies the access")]
    Protection { entry: u32 },
}

/// Addressing mode selected by the processor-state collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Legacy,
    Protected,
}

/// Processor state consumed by a resolution.
///
/// Passed explicitly into every call rather than read from process-wide
/// globals; owned and updated by the hosting CPU model, read-only here.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorState {
    pub mode: AddressingMode,
    /// Physical address of the active translation root: a flat array of 256
    /// page-table entries in legacy mode, 256 directory pointers in
    /// protected mode.
    pub root: u32,
    /// Supervisor flag. Entries with the privileged bit set resolve only
    /// while this is set.
    pub supervisor: bool,
}

/// Translation-cache and walk counters. All counters wrap on overflow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MmuStats {
    /// Cache probes performed by the protected resolver.
    pub lookups: u64,
    /// Probes that hit.
    pub hits: u64,
    /// Probes that missed.
    pub misses: u64,
    /// Table walks performed due to cache misses.
    pub walks: u64,
    /// Cache fills after a walk reached a valid entry.
    pub fills: u64,
}

/// The translation unit: both resolvers plus the cache they share.
#[derive(Debug, Clone)]
pub struct Mmu {
    tlb: Tlb,
    stats: MmuStats,
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu {
    pub fn new() -> Self {
        Self {
            tlb: Tlb::new(),
            stats: MmuStats::default(),
        }
    }

    /// Returns current cache/walk statistics.
    #[inline]
    pub fn stats(&self) -> MmuStats {
        self.stats
    }

    /// Resets statistics counters back to 0.
    #[inline]
    pub fn reset_stats(&mut self) {
        self.stats = MmuStats::default();
    }

    /// Drops the cached translation derived from `vaddr`, if present.
    ///
    /// Maintenance hook for the collaborator that owns the page tables;
    /// resolutions never invalidate.
    pub fn invalidate_page(&mut self, vaddr: u32) {
        self.tlb.invalidate_address(vaddr);
    }

    /// Drops every cached translation.
    pub fn flush_cache(&mut self) {
        self.tlb.flush_all();
    }

    /// Resolves `vaddr` according to the active addressing mode.
    ///
    /// Legacy mode decodes only the low 16 bits of `vaddr` and ignores
    /// `access`.
    pub fn translate(
        &mut self,
        state: &ProcessorState,
        bus: &mut impl MemoryBus,
        vaddr: u32,
        access: AccessType,
    ) -> Result<u32, Fault> {
        match state.mode {
            AddressingMode::Legacy => self.resolve_legacy(state, bus, vaddr as u16),
            AddressingMode::Protected => self.resolve(state, bus, vaddr, access),
        }
    }

    /// 16-bit legacy mode: single-level lookup in a flat 256-entry table.
    ///
    /// Permission bits are ignored entirely; a valid page is accessible for
    /// every access kind. The translation cache is not consulted.
    pub fn resolve_legacy(
        &self,
        state: &ProcessorState,
        bus: &mut impl MemoryBus,
        vaddr: u16,
    ) -> Result<u32, Fault> {
        let page = u32::from(vaddr >> 8);
        let offset = u32::from(vaddr & 0xff);

        let entry = bus.read_u32(state.root + page * 4);
        if !pte::pte_valid(entry) {
            return Err(Fault::Page { vpn: page });
        }
        Ok((pte::pte_ppn(entry) << 8) | offset)
    }

    /// 32-bit protected mode: three-level walk through the translation
    /// cache.
    ///
    /// The walk is strictly short-circuiting: the first invalid pointer or
    /// entry ends it with a page fault carrying the virtual page number.
    /// A valid leaf entry is inserted into the cache *before* permission
    /// evaluation, so even a resolution that ends in a protection fault
    /// warms the cache for later accesses of a permitted kind.
    pub fn resolve(
        &mut self,
        state: &ProcessorState,
        bus: &mut impl MemoryBus,
        vaddr: u32,
        access: AccessType,
    ) -> Result<u32, Fault> {
        let index = cache_index(vaddr);
        let tag = cache_tag(vaddr);
        let vpn = vaddr >> 8;
        let offset = vaddr & 0xff;

        self.stats.lookups = self.stats.lookups.wrapping_add(1);
        if let Some(entry) = self.tlb.probe(index, tag) {
            // A hit is authoritative: the entry was valid when cached, and
            // stale slots are the table owner's problem. No re-walk.
            self.stats.hits = self.stats.hits.wrapping_add(1);
            return evaluate_valid_pte(state, access, entry, offset);
        }
        self.stats.misses = self.stats.misses.wrapping_add(1);
        self.stats.walks = self.stats.walks.wrapping_add(1);

        let dir_index = vaddr >> 24;
        let table_index = (vaddr >> 16) & 0xff;
        let entry_index = (vaddr >> 8) & 0xff;

        let dir_ptr = bus.read_u32(state.root + dir_index * 4);
        if !pte::ptr_valid(dir_ptr) {
            trace!(vaddr, vpn, "walk: invalid directory pointer");
            return Err(Fault::Page { vpn });
        }

        let table_ptr = bus.read_u32(pte::ptr_base(dir_ptr) + table_index * 4);
        if !pte::ptr_valid(table_ptr) {
            trace!(vaddr, vpn, "walk: invalid table pointer");
            return Err(Fault::Page { vpn });
        }

        let entry = bus.read_u32(pte::ptr_base(table_ptr) + entry_index * 4);
        if !pte::pte_valid(entry) {
            trace!(vaddr, vpn, "walk: invalid entry");
            return Err(Fault::Page { vpn });
        }

        self.tlb.insert(index, tag, entry);
        self.stats.fills = self.stats.fills.wrapping_add(1);
        trace!(vaddr, entry, "walk: cache fill");

        evaluate_valid_pte(state, access, entry, offset)
    }
}

/// Decides whether `access` to a confirmed-valid entry is allowed.
///
/// Pure. Must only be consulted for entries whose valid bit is set; an
/// invalid entry's permission field is meaningless.
fn check_perms(access: AccessType, entry: u32, supervisor: bool) -> Result<(), Fault> {
    let permitted = match access {
        AccessType::Read => entry & pte::PTE_READ != 0,
        AccessType::Write => entry & pte::PTE_WRITE != 0,
        AccessType::Execute => entry & pte::PTE_EXEC != 0,
    };
    if !permitted || (entry & pte::PTE_PRIV != 0 && !supervisor) {
        return Err(Fault::Protection { entry });
    }
    Ok(())
}

/// Permission-checks a valid entry and assembles the physical address.
fn evaluate_valid_pte(
    state: &ProcessorState,
    access: AccessType,
    entry: u32,
    offset: u32,
) -> Result<u32, Fault> {
    check_perms(access, entry, state.supervisor)?;
    Ok((pte::pte_ppn(entry) << 8) | offset)
}

#[cfg(test)]
mod tests;
