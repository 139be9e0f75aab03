//! Process table
//!
//! Dense circular array of processes addressed by monotonically increasing
//! indices. Live processes occupy `pfst..=plst`, stored at `pix % pcap`;
//! capacity doubles on overflow with every live process re-homed to its
//! new slot. Processes die oldest-first. The table also carries the
//! scheduler cursor (`pcur`), the remaining quantum (`psli`) and the
//! completed round-robin count (`ncyc`).

/// Ring-buffered dense process array plus scheduling state.
pub struct ProcessTable<P> {
    pvec: Vec<P>,
    pcap: u64,
    pnum: u64,
    pfst: u64,
    plst: u64,
    pcur: u64,
    psli: u64,
    ncyc: u64,
    /// Sentinel returned for reads outside the live range.
    dead: P,
}

impl<P: Copy + Default> ProcessTable<P> {
    /// One live (all-default) process, capacity 1.
    pub fn new() -> Self {
        Self {
            pvec: vec![P::default()],
            pcap: 1,
            pnum: 1,
            pfst: 0,
            plst: 0,
            pcur: 0,
            psli: 0,
            ncyc: 0,
            dead: P::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        pvec: Vec<P>,
        pnum: u64,
        pfst: u64,
        plst: u64,
        pcur: u64,
        psli: u64,
        ncyc: u64,
    ) -> Self {
        let pcap = pvec.len() as u64;
        assert!(pnum <= pcap);
        Self {
            pvec,
            pcap,
            pnum,
            pfst,
            plst,
            pcur,
            psli,
            ncyc,
            dead: P::default(),
        }
    }

    pub fn pnum(&self) -> u64 {
        self.pnum
    }

    pub fn pcap(&self) -> u64 {
        self.pcap
    }

    pub fn pfst(&self) -> u64 {
        self.pfst
    }

    pub fn plst(&self) -> u64 {
        self.plst
    }

    pub fn pcur(&self) -> u64 {
        self.pcur
    }

    pub fn psli(&self) -> u64 {
        self.psli
    }

    pub fn ncyc(&self) -> u64 {
        self.ncyc
    }

    pub(crate) fn slots(&self) -> &[P] {
        &self.pvec
    }

    pub fn is_live(&self, pix: u64) -> bool {
        pix >= self.pfst && pix <= self.plst
    }

    /// Read access; dead indices yield the all-default sentinel.
    pub fn get(&self, pix: u64) -> &P {
        if self.is_live(pix) {
            &self.pvec[(pix % self.pcap) as usize]
        } else {
            &self.dead
        }
    }

    /// Mutable access to a live process.
    pub fn fetch(&mut self, pix: u64) -> &mut P {
        assert!(self.is_live(pix), "fetch of dead process {pix}");
        &mut self.pvec[(pix % self.pcap) as usize]
    }

    /// Append a newborn at `plst + 1`, doubling capacity when full.
    pub fn push(&mut self, proc: P) {
        if self.pnum == self.pcap {
            let new_pcap = self.pcap * 2;
            let mut new_pvec = vec![P::default(); new_pcap as usize];

            for pix in self.pfst..=self.plst {
                new_pvec[(pix % new_pcap) as usize] = self.pvec[(pix % self.pcap) as usize];
            }

            self.pcap = new_pcap;
            self.pvec = new_pvec;
        }

        self.pnum += 1;
        self.plst += 1;
        let slot = (self.plst % self.pcap) as usize;
        self.pvec[slot] = proc;
    }

    /// Drop the front process. The architecture's kill hook must already
    /// have freed its memory and blanked the slot. Advancing `pcur`
    /// together with `pfst` keeps the scheduling position intact.
    pub(crate) fn advance_kill(&mut self) {
        assert!(self.pnum > 1, "kill with a sole survivor");
        self.pcur += 1;
        self.pfst += 1;
        self.pnum -= 1;
    }

    pub(crate) fn set_pcur(&mut self, pcur: u64) {
        self.pcur = pcur;
    }

    pub(crate) fn set_psli(&mut self, psli: u64) {
        self.psli = psli;
    }

    pub(crate) fn dec_psli(&mut self) {
        self.psli -= 1;
    }

    pub(crate) fn inc_pcur(&mut self) {
        self.pcur += 1;
    }

    pub(crate) fn inc_ncyc(&mut self) {
        self.ncyc += 1;
    }
}

impl<P: Copy + Default> Default for ProcessTable<P> {
    fn default() -> Self {
        Self::new()
    }
}
