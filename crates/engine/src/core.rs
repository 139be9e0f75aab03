//! One simulation core
//!
//! A self-contained virtual-machine instance: byte memory, process table,
//! PRNG and IPC window, advanced one slice per [`Core::step`]. Cores never
//! observe each other; the driver alone moves state between them at sync
//! boundaries.

use std::marker::PhantomData;

use crate::arch::Architecture;
use crate::config::{Config, MutationKind};
use crate::ipc::IpcBuffer;
use crate::memory::{MemoryVector, INST_MASK};
use crate::prng::Prng;
use crate::table::ProcessTable;

/// Ancestor base address when `anc_half` is set. For a power-of-two
/// memory size this aliases physical address 0 while keeping `ip`/`sp`
/// mid-range in `u64` space, which biases seek and walk directions.
pub const ANC_HALF_BASE: u64 = 1 << 63;

/// Per-core behavior constants, copied out of [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct CoreParams {
    pub muta_range: u64,
    pub mutation: MutationKind,
    pub anc_clones: u64,
    pub anc_half: bool,
}

impl CoreParams {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            muta_range: config.muta_range,
            mutation: config.mutation,
            anc_clones: config.anc_clones,
            anc_half: config.anc_half,
        }
    }
}

/// One self-contained VM instance.
pub struct Core<A: Architecture> {
    mem: MemoryVector,
    procs: ProcessTable<A::Proc>,
    prng: Prng,
    ipc: IpcBuffer,
    params: CoreParams,
    _arch: PhantomData<fn() -> A>,
}

impl<A: Architecture> Core<A> {
    pub(crate) fn new(mvec_size: u64, sync_interval: u64, params: CoreParams) -> Self {
        Self {
            mem: MemoryVector::new(mvec_size),
            procs: ProcessTable::new(),
            prng: Prng::zeroed(),
            ipc: IpcBuffer::new(sync_interval),
            params,
            _arch: PhantomData,
        }
    }

    pub(crate) fn from_parts(
        mem: MemoryVector,
        procs: ProcessTable<A::Proc>,
        prng: Prng,
        ipc: IpcBuffer,
        params: CoreParams,
    ) -> Self {
        Self {
            mem,
            procs,
            prng,
            ipc,
            params,
            _arch: PhantomData,
        }
    }

    pub fn mem(&self) -> &MemoryVector {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut MemoryVector {
        &mut self.mem
    }

    pub fn procs(&self) -> &ProcessTable<A::Proc> {
        &self.procs
    }

    pub fn procs_mut(&mut self) -> &mut ProcessTable<A::Proc> {
        &mut self.procs
    }

    pub fn prng(&self) -> &Prng {
        &self.prng
    }

    pub(crate) fn set_prng(&mut self, prng: Prng) {
        self.prng = prng;
    }

    pub fn ipc(&self) -> &IpcBuffer {
        &self.ipc
    }

    pub(crate) fn ipc_mut(&mut self) -> &mut IpcBuffer {
        &mut self.ipc
    }

    pub fn params(&self) -> &CoreParams {
        &self.params
    }

    /// Address the ancestor image is assembled at.
    pub fn anc_base(&self) -> u64 {
        if self.params.anc_half {
            ANC_HALF_BASE
        } else {
            0
        }
    }

    /// True iff `addr` falls inside one of the process's two blocks.
    pub fn is_proc_owner(&self, addr: u64, pix: u64) -> bool {
        assert!(self.procs.is_live(pix));

        let mb0a = A::mb0_addr(self, pix);
        let mb0s = A::mb0_size(self, pix);
        if addr.wrapping_sub(mb0a) % self.mem.len() < mb0s {
            return true;
        }

        let mb1a = A::mb1_addr(self, pix);
        let mb1s = A::mb1_size(self, pix);
        addr.wrapping_sub(mb1a) % self.mem.len() < mb1s
    }

    /// First live process owning an allocated address. Panics when the
    /// allocation bitmap and the process blocks disagree.
    pub fn get_owner(&self, addr: u64) -> u64 {
        assert!(self.mem.is_alloc(addr));

        for pix in self.procs.pfst()..=self.procs.plst() {
            if self.is_proc_owner(addr, pix) {
                return pix;
            }
        }

        panic!("allocated byte {addr:#x} has no owner");
    }

    /// Append a newborn process.
    pub fn proc_new(&mut self, proc: A::Proc) {
        self.procs.push(proc);
    }

    /// Kill the oldest process. The architecture hook frees its memory
    /// and blanks the slot before the table advances.
    pub fn proc_kill(&mut self) {
        assert!(self.procs.pnum() > 1, "kill with a sole survivor");
        A::on_kill(self);
        self.procs.advance_kill();
    }

    /// Record an outgoing IPC mutation in the slot the core is currently
    /// stepping. Only valid from inside `Architecture::step` (the slot is
    /// drained right before the architecture runs); at most one push per
    /// step.
    pub fn push_ipcm(&mut self, inst: u8, addr: u64) {
        self.ipc.push(inst, addr);
    }

    fn pull_ipcm(&mut self) {
        if let Some((inst, addr)) = self.ipc.take_pending() {
            self.mem.set_inst(addr, inst & INST_MASK);
        }
    }

    /// One cosmic-ray invocation: two draws, and a perturbation when the
    /// first lands inside memory. Both draws happen even on a miss.
    fn cosmic_ray(&mut self) {
        let a = self.prng.next() % self.params.muta_range;
        let b = self.prng.next();

        if a < self.mem.len() {
            match self.params.mutation {
                MutationKind::FlipBit => self.mem.flip_bit(a, (b % 8) as u32),
                MutationKind::Overwrite => self.mem.set_inst(a, (b as u8) & INST_MASK),
            }
        }
    }

    /// Advance one slice: drain the pending IPC slot, run the scheduled
    /// process for one tick, move the cursors. At the end of a full
    /// round-robin, cull from the front while memory stays over half
    /// full, then fire the cosmic ray exactly once.
    pub fn step(&mut self) {
        loop {
            if self.procs.psli() != 0 {
                self.pull_ipcm();
                let pcur = self.procs.pcur();
                A::step(self, pcur);

                self.procs.dec_psli();
                self.ipc.advance_cursor();
                return;
            }

            if self.procs.pcur() != self.procs.plst() {
                self.procs.inc_pcur();
                let psli = A::slice(self, self.procs.pcur());
                self.procs.set_psli(psli);
                continue;
            }

            assert!(self.procs.pnum() > 0, "core has no live processes");

            self.procs.set_pcur(self.procs.pfst());
            let psli = A::slice(self, self.procs.pcur());
            self.procs.set_psli(psli);
            self.procs.inc_ncyc();

            while self.mem.mall() > self.mem.len() / 2 && self.procs.pnum() > 1 {
                self.proc_kill();
            }

            self.cosmic_ray();
        }
    }

    /// Debug invariant walk for this core; the driver adds the
    /// step-count-dependent checks.
    #[cfg(debug_assertions)]
    pub(crate) fn validate(&self) {
        assert!(self.procs.plst() >= self.procs.pfst());
        assert_eq!(
            self.procs.pnum(),
            self.procs.plst() + 1 - self.procs.pfst()
        );
        assert!(self.procs.pnum() <= self.procs.pcap());
        assert!(self.procs.pcur() >= self.procs.pfst());
        assert!(self.procs.pcur() <= self.procs.plst());

        let mall = (0..self.mem.len())
            .filter(|&addr| self.mem.is_alloc(addr))
            .count() as u64;
        assert_eq!(self.mem.mall(), mall);

        for pix in self.procs.pfst()..=self.procs.plst() {
            A::validate_proc(self, pix);
        }

        for i in 0..self.ipc.len() as usize {
            let inst = self.ipc.inst_slots()[i];
            if inst & crate::ipc::IPCM_FLAG == 0 {
                assert_eq!(inst, 0);
                assert_eq!(self.ipc.addr_slots()[i], 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::persist::{read_u64, write_u64};

    /// Scripted architecture: every step increments the process value.
    /// The quantum is the const parameter.
    struct CountArch<const SLICE: u64>;

    impl<const SLICE: u64> Architecture for CountArch<SLICE> {
        type Proc = u64;

        fn mb0_addr(_core: &Core<Self>, _pix: u64) -> u64 {
            0
        }
        fn mb0_size(_core: &Core<Self>, _pix: u64) -> u64 {
            0
        }
        fn mb1_addr(_core: &Core<Self>, _pix: u64) -> u64 {
            0
        }
        fn mb1_size(_core: &Core<Self>, _pix: u64) -> u64 {
            0
        }
        fn ip_addr(_core: &Core<Self>, _pix: u64) -> u64 {
            0
        }
        fn sp_addr(_core: &Core<Self>, _pix: u64) -> u64 {
            0
        }

        fn slice(_core: &Core<Self>, _pix: u64) -> u64 {
            SLICE
        }

        fn step(core: &mut Core<Self>, pix: u64) {
            *core.procs_mut().fetch(pix) += 1;
        }

        fn on_kill(core: &mut Core<Self>) {
            let pfst = core.procs().pfst();
            *core.procs_mut().fetch(pfst) = 0;
        }

        fn anc_init(_core: &mut Core<Self>, _size: u64) {}

        fn symbol(_inst: u8) -> char {
            '.'
        }

        fn mnemonic(_inst: u8) -> &'static str {
            "noop"
        }

        fn validate_proc(_core: &Core<Self>, _pix: u64) {}

        fn store_proc<W: Write>(proc: &u64, w: &mut W) -> std::io::Result<()> {
            write_u64(w, *proc)
        }

        fn load_proc<R: Read>(r: &mut R) -> std::io::Result<u64> {
            read_u64(r)
        }
    }

    fn params() -> CoreParams {
        CoreParams {
            muta_range: u64::MAX,
            mutation: MutationKind::Overwrite,
            anc_clones: 1,
            anc_half: false,
        }
    }

    #[test]
    fn test_round_robin_with_quantum() {
        let mut core: Core<CountArch<2>> = Core::new(8, 0x100, params());
        core.proc_new(0);
        assert_eq!(core.procs().pnum(), 2);

        // a fresh multi-process core schedules process 1 first; process 0
        // gets its quantum at the first cycle turnover
        for _ in 0..6 {
            core.step();
        }

        assert_eq!(*core.procs().get(0), 2);
        assert_eq!(*core.procs().get(1), 4);
        assert_eq!(core.procs().ncyc(), 1);
        assert_eq!(core.procs().pcur(), 1);
    }

    #[test]
    fn test_single_process_cycles_every_step() {
        let mut core: Core<CountArch<1>> = Core::new(8, 0x100, params());
        for _ in 0..5 {
            core.step();
        }
        assert_eq!(*core.procs().get(0), 5);
        assert_eq!(core.procs().ncyc(), 5);
    }

    #[test]
    fn test_kill_when_full_culls_to_sole_survivor() {
        let mut core: Core<CountArch<1>> = Core::new(8, 0x100, params());
        core.proc_new(0);
        core.proc_new(0);
        for addr in 0..5 {
            core.mem_mut().alloc(addr);
        }

        // CountArch frees nothing on kill, so the cull only stops at the
        // sole-survivor guard
        for _ in 0..3 {
            core.step();
        }

        assert_eq!(core.procs().pnum(), 1);
        assert_eq!(core.procs().pfst(), 2);
        assert_eq!(core.procs().pcur(), 2);
        assert_eq!(core.mem().mall(), 5);
    }

    #[test]
    fn test_cosmic_ray_flip_bit_toggles() {
        let mut core: Core<CountArch<1>> = Core::new(8, 0x100, CoreParams {
            mutation: MutationKind::FlipBit,
            ..params()
        });

        // zeroed PRNG: every cycle flips bit 0 of address 0
        core.step();
        assert_eq!(core.mem().get_inst(0), 1);
        core.step();
        assert_eq!(core.mem().get_inst(0), 0);
    }

    #[test]
    fn test_cosmic_ray_miss_leaves_memory_alone() {
        let mut core: Core<CountArch<1>> = Core::new(8, 0x100, CoreParams {
            mutation: MutationKind::FlipBit,
            ..params()
        });
        core.set_prng(Prng::seeded(&mut crate::prng::SplitMix64::new(3)));

        let range = core.params().muta_range;
        let mut probe = Prng::from_state(core.prng().state());
        let mut hits = 0;
        for _ in 0..4 {
            let a = probe.next() % range;
            probe.next();
            if a < core.mem().len() {
                hits += 1;
            }
        }
        // u64::MAX miss range over an 8-byte memory: no hit in practice
        assert_eq!(hits, 0);

        for _ in 0..4 {
            core.step();
        }
        for addr in 0..core.mem().len() {
            assert_eq!(core.mem().get_byte(addr), 0);
        }
    }

    #[test]
    fn test_pull_applies_pending_mutation() {
        let mut core: Core<CountArch<1>> = Core::new(16, 0x100, params());
        core.push_ipcm(0x19, 9);

        core.step();

        assert_eq!(core.mem().get_inst(9), 0x19);
        assert_eq!(core.ipc().inst_slots()[0], 0);
        assert_eq!(core.ipc().addr_slots()[0], 0);
        assert_eq!(core.ipc().ivpt(), 1);
    }

    #[test]
    fn test_owner_queries() {
        struct BlockArch;
        impl Architecture for BlockArch {
            type Proc = (u64, u64);

            fn mb0_addr(core: &Core<Self>, pix: u64) -> u64 {
                core.procs().get(pix).0
            }
            fn mb0_size(core: &Core<Self>, pix: u64) -> u64 {
                core.procs().get(pix).1
            }
            fn mb1_addr(_core: &Core<Self>, _pix: u64) -> u64 {
                0
            }
            fn mb1_size(_core: &Core<Self>, _pix: u64) -> u64 {
                0
            }
            fn ip_addr(_core: &Core<Self>, _pix: u64) -> u64 {
                0
            }
            fn sp_addr(_core: &Core<Self>, _pix: u64) -> u64 {
                0
            }
            fn slice(_core: &Core<Self>, _pix: u64) -> u64 {
                1
            }
            fn step(_core: &mut Core<Self>, _pix: u64) {}
            fn on_kill(_core: &mut Core<Self>) {}
            fn anc_init(_core: &mut Core<Self>, _size: u64) {}
            fn symbol(_inst: u8) -> char {
                '.'
            }
            fn mnemonic(_inst: u8) -> &'static str {
                "noop"
            }
            fn validate_proc(_core: &Core<Self>, _pix: u64) {}
            fn store_proc<W: Write>(proc: &(u64, u64), w: &mut W) -> std::io::Result<()> {
                write_u64(w, proc.0)?;
                write_u64(w, proc.1)
            }
            fn load_proc<R: Read>(r: &mut R) -> std::io::Result<(u64, u64)> {
                Ok((read_u64(r)?, read_u64(r)?))
            }
        }

        let mut core: Core<BlockArch> = Core::new(16, 0x100, params());
        *core.procs_mut().fetch(0) = (4, 3);
        core.proc_new((10, 2));
        for addr in [4, 5, 6, 10, 11] {
            core.mem_mut().alloc(addr);
        }

        assert!(core.is_proc_owner(5, 0));
        assert!(!core.is_proc_owner(5, 1));
        // ownership wraps with the address space
        assert!(core.is_proc_owner(16 + 4, 0));

        assert_eq!(core.get_owner(6), 0);
        assert_eq!(core.get_owner(11), 1);
    }

    #[test]
    #[should_panic]
    fn test_owner_of_unallocated_byte_panics() {
        let core: Core<CountArch<1>> = Core::new(8, 0x100, params());
        core.get_owner(0);
    }
}
