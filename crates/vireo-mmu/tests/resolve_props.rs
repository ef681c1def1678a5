//! Property tests: the resolver against a straight-line reference model.

use proptest::prelude::*;

use vireo_mem::Arena;
use vireo_mmu::pte::{
    self, PTE_EXEC, PTE_PPN_SHIFT, PTE_PRIV, PTE_READ, PTE_VALID, PTE_WRITE, PTR_VALID,
};
use vireo_mmu::{AccessType, AddressingMode, Fault, Mmu, ProcessorState};

const ROOT: u32 = 0x0000;
const DIR_BASE: u32 = 0x0400;
const TABLE_BASE: u32 = 0x0800;

#[derive(Clone, Debug)]
struct Mapping {
    valid: bool,
    readable: bool,
    writable: bool,
    executable: bool,
    privileged: bool,
    ppn: u32,
}

impl Mapping {
    fn encode(&self) -> u32 {
        let mut entry = self.ppn << PTE_PPN_SHIFT;
        if self.valid {
            entry |= PTE_VALID;
        }
        if self.readable {
            entry |= PTE_READ;
        }
        if self.writable {
            entry |= PTE_WRITE;
        }
        if self.executable {
            entry |= PTE_EXEC;
        }
        if self.privileged {
            entry |= PTE_PRIV;
        }
        entry
    }
}

prop_compose! {
    fn arb_mapping()(
        valid in any::<bool>(),
        readable in any::<bool>(),
        writable in any::<bool>(),
        executable in any::<bool>(),
        privileged in any::<bool>(),
        ppn in 0u32..(1 << 24),
    ) -> Mapping {
        Mapping {
            valid,
            readable,
            writable,
            executable,
            privileged,
            ppn,
        }
    }
}

fn arb_access() -> impl Strategy<Value = AccessType> {
    prop_oneof![
        Just(AccessType::Read),
        Just(AccessType::Write),
        Just(AccessType::Execute),
    ]
}

/// Builds a table image where virtual page `i` (directory 0, table 0,
/// entry `i`) is described by `mappings[i]`; entries past the slice stay
/// zero, i.e. invalid.
fn build_tables(mappings: &[Mapping]) -> Arena {
    let mut mem = Arena::new(0x1_0000);
    mem.try_write_u32(ROOT, DIR_BASE | PTR_VALID).unwrap();
    mem.try_write_u32(DIR_BASE, TABLE_BASE | PTR_VALID).unwrap();
    for (i, mapping) in mappings.iter().enumerate() {
        mem.try_write_u32(TABLE_BASE + (i as u32) * 4, mapping.encode())
            .unwrap();
    }
    mem
}

fn protected_state(supervisor: bool) -> ProcessorState {
    ProcessorState {
        mode: AddressingMode::Protected,
        root: ROOT,
        supervisor,
    }
}

/// Straight-line model of the protected-mode walk, reading the arena
/// directly with no cache.
fn reference_resolve(
    mem: &Arena,
    supervisor: bool,
    vaddr: u32,
    access: AccessType,
) -> Result<u32, Fault> {
    let vpn = vaddr >> 8;

    let dir_ptr = mem.try_read_u32(ROOT + (vaddr >> 24) * 4).unwrap();
    if dir_ptr & PTR_VALID == 0 {
        return Err(Fault::Page { vpn });
    }
    let table_ptr = mem
        .try_read_u32(pte::ptr_base(dir_ptr) + ((vaddr >> 16) & 0xff) * 4)
        .unwrap();
    if table_ptr & PTR_VALID == 0 {
        return Err(Fault::Page { vpn });
    }
    let entry = mem
        .try_read_u32(pte::ptr_base(table_ptr) + ((vaddr >> 8) & 0xff) * 4)
        .unwrap();
    if entry & PTE_VALID == 0 {
        return Err(Fault::Page { vpn });
    }

    let permitted = match access {
        AccessType::Read => entry & PTE_READ != 0,
        AccessType::Write => entry & PTE_WRITE != 0,
        AccessType::Execute => entry & PTE_EXEC != 0,
    };
    if !permitted || (entry & PTE_PRIV != 0 && !supervisor) {
        return Err(Fault::Protection { entry });
    }
    Ok((pte::pte_ppn(entry) << 8) | (vaddr & 0xff))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resolver_matches_reference_model(
        mappings in prop::collection::vec(arb_mapping(), 1..16),
        accesses in prop::collection::vec(
            (0u32..32, any::<u8>(), arb_access(), any::<bool>()),
            1..32,
        ),
    ) {
        let mut mem = build_tables(&mappings);
        let mut mmu = Mmu::new();

        for (page, offset, access, supervisor) in accesses {
            let vaddr = (page << 8) | u32::from(offset);
            let expected = reference_resolve(&mem, supervisor, vaddr, access);
            let got = mmu.resolve(&protected_state(supervisor), &mut mem, vaddr, access);
            prop_assert_eq!(
                got,
                expected,
                "mismatch at vaddr={:#010x} access={:?} supervisor={}",
                vaddr,
                access,
                supervisor
            );
        }
    }

    #[test]
    fn cached_resolution_matches_the_first_walk(
        mapping in arb_mapping(),
        offsets in prop::collection::vec(any::<u8>(), 1..8),
        access in arb_access(),
    ) {
        let mut mem = build_tables(std::slice::from_ref(&mapping));
        let mut mmu = Mmu::new();
        let state = protected_state(true);

        for offset in offsets {
            let vaddr = u32::from(offset);
            let first = mmu.resolve(&state, &mut mem, vaddr, access);
            let second = mmu.resolve(&state, &mut mem, vaddr, access);
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn legacy_mode_matches_the_entry_image(
        entries in prop::collection::vec(any::<u32>(), 1..64),
        vaddr in any::<u16>(),
    ) {
        let mut mem = Arena::new(0x1_0000);
        for (i, entry) in entries.iter().enumerate() {
            mem.try_write_u32(ROOT + (i as u32) * 4, *entry).unwrap();
        }

        let mmu = Mmu::new();
        let state = ProcessorState {
            mode: AddressingMode::Legacy,
            root: ROOT,
            supervisor: false,
        };

        let page = u32::from(vaddr >> 8);
        let entry = mem.try_read_u32(ROOT + page * 4).unwrap();
        let expected = if entry & PTE_VALID != 0 {
            Ok((pte::pte_ppn(entry) << 8) | u32::from(vaddr & 0xff))
        } else {
            Err(Fault::Page { vpn: page })
        };

        prop_assert_eq!(mmu.resolve_legacy(&state, &mut mem, vaddr), expected);
    }
}
