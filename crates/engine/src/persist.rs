//! Snapshot persistence
//!
//! Little-endian binary format, every field written explicitly. A short
//! header pins the geometry so a snapshot cannot be restored under a
//! mismatched configuration. Per core, in order: the scalar fields, the
//! IPC slot vectors, the full process ring (live and dead slots) and the
//! raw memory image; the driver appends the global step and sync counts.

use std::io::{Read, Write};

use crate::arch::Architecture;
use crate::config::Config;
use crate::core::{Core, CoreParams};
use crate::error::{EngineError, Result};
use crate::ipc::IpcBuffer;
use crate::memory::MemoryVector;
use crate::prng::Prng;
use crate::table::ProcessTable;

const MAGIC: [u8; 4] = *b"SLS3";
const VERSION: u32 = 1;

pub(crate) fn write_u64<W: Write>(w: &mut W, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn write_header<W: Write>(w: &mut W, config: &Config) -> Result<()> {
    w.write_all(&MAGIC)?;
    write_u32(w, VERSION)?;
    write_u64(w, config.core_count as u64)?;
    write_u64(w, config.mvec_size)?;
    write_u64(w, config.sync_interval)?;
    Ok(())
}

pub(crate) fn read_header<R: Read>(r: &mut R, config: &Config) -> Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(EngineError::SnapshotFormat("bad magic".into()));
    }
    let version = read_u32(r)?;
    if version != VERSION {
        return Err(EngineError::SnapshotFormat(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let core_count = read_u64(r)?;
    let mvec_size = read_u64(r)?;
    let sync_interval = read_u64(r)?;
    if core_count != config.core_count as u64
        || mvec_size != config.mvec_size
        || sync_interval != config.sync_interval
    {
        return Err(EngineError::SnapshotFormat(format!(
            "snapshot geometry {core_count}/{mvec_size:#x}/{sync_interval:#x} \
             does not match configuration {}/{:#x}/{:#x}",
            config.core_count, config.mvec_size, config.sync_interval
        )));
    }
    Ok(())
}

pub(crate) fn write_core<A: Architecture, W: Write>(w: &mut W, core: &Core<A>) -> Result<()> {
    write_u64(w, core.mem().mall())?;
    for word in core.prng().state() {
        write_u64(w, word)?;
    }

    let table = core.procs();
    write_u64(w, table.pnum())?;
    write_u64(w, table.pcap())?;
    write_u64(w, table.pfst())?;
    write_u64(w, table.plst())?;
    write_u64(w, table.pcur())?;
    write_u64(w, table.psli())?;
    write_u64(w, table.ncyc())?;
    write_u64(w, core.ipc().ivpt())?;

    w.write_all(core.ipc().inst_slots())?;
    for &addr in core.ipc().addr_slots() {
        write_u64(w, addr)?;
    }

    for proc in table.slots() {
        A::store_proc(proc, w)?;
    }

    w.write_all(core.mem().as_bytes())?;
    Ok(())
}

pub(crate) fn read_core<A: Architecture, R: Read>(
    r: &mut R,
    mvec_size: u64,
    sync_interval: u64,
    params: CoreParams,
) -> Result<Core<A>> {
    let mall = read_u64(r)?;
    let mut muta = [0u64; 4];
    for word in &mut muta {
        *word = read_u64(r)?;
    }

    let pnum = read_u64(r)?;
    let pcap = read_u64(r)?;
    let pfst = read_u64(r)?;
    let plst = read_u64(r)?;
    let pcur = read_u64(r)?;
    let psli = read_u64(r)?;
    let ncyc = read_u64(r)?;
    let ivpt = read_u64(r)?;

    if pcap == 0 || pnum == 0 || pnum > pcap {
        return Err(EngineError::SnapshotFormat(format!(
            "inconsistent process table: pnum {pnum}, pcap {pcap}"
        )));
    }

    let mut iviv = vec![0u8; sync_interval as usize];
    r.read_exact(&mut iviv)?;
    let mut ivav = vec![0u64; sync_interval as usize];
    for addr in &mut ivav {
        *addr = read_u64(r)?;
    }

    let mut pvec = Vec::with_capacity(pcap as usize);
    for _ in 0..pcap {
        pvec.push(A::load_proc(r)?);
    }

    let mut mvec = vec![0u8; mvec_size as usize];
    r.read_exact(&mut mvec)?;
    let mem = MemoryVector::from_bytes(mvec.into_boxed_slice());
    if mem.mall() != mall {
        return Err(EngineError::SnapshotFormat(format!(
            "allocation count {} disagrees with memory image ({})",
            mall,
            mem.mall()
        )));
    }

    Ok(Core::from_parts(
        mem,
        ProcessTable::from_parts(pvec, pnum, pfst, plst, pcur, psli, ncyc),
        Prng::from_state(muta),
        IpcBuffer::from_parts(iviv, ivav, ivpt),
        params,
    ))
}
