//! Architecture plug
//!
//! The engine is generic over an [`Architecture`]: the bytecode ISA that
//! owns the process layout and per-slice execution. The engine only reads
//! processes through this contract; everything else (scheduling, memory
//! bookkeeping, mutation, IPC, persistence framing) is architecture
//! independent.

use std::io::{Read, Write};

use crate::core::Core;

pub mod v1;

/// Contract between the engine and a bytecode ISA.
///
/// All `pix` arguments must be live. `slice` must return at least 1.
/// Persistence serializes each `Proc` field explicitly through
/// `store_proc`/`load_proc`; the engine never touches raw process bytes.
pub trait Architecture: Sized + 'static {
    /// Per-process state, owned by the architecture.
    type Proc: Copy + Clone + Default + Send + 'static;

    /// Primary (self) memory block.
    fn mb0_addr(core: &Core<Self>, pix: u64) -> u64;
    fn mb0_size(core: &Core<Self>, pix: u64) -> u64;

    /// Child-under-construction block; 0/0 if none.
    fn mb1_addr(core: &Core<Self>, pix: u64) -> u64;
    fn mb1_size(core: &Core<Self>, pix: u64) -> u64;

    /// Instruction and seek pointers.
    fn ip_addr(core: &Core<Self>, pix: u64) -> u64;
    fn sp_addr(core: &Core<Self>, pix: u64) -> u64;

    /// Quantum granted by the scheduler, >= 1.
    fn slice(core: &Core<Self>, pix: u64) -> u64;

    /// Advance one slice tick. A plug may call [`Core::push_ipcm`] at
    /// most once per step.
    fn step(core: &mut Core<Self>, pix: u64);

    /// Called with the doomed process at `pfst`; must free its owned
    /// memory and overwrite the slot with the default process.
    fn on_kill(core: &mut Core<Self>);

    /// Stamp the seed processes after the ancestor bytes are assembled.
    /// `size` is the assembled byte count (0 when no ancestor).
    fn anc_init(core: &mut Core<Self>, size: u64);

    /// Display glyph for an instruction byte.
    fn symbol(inst: u8) -> char;

    /// Assembler mnemonic for an instruction byte.
    fn mnemonic(inst: u8) -> &'static str;

    /// Debug-build invariant check for one process.
    fn validate_proc(core: &Core<Self>, pix: u64);

    /// Serialize one process, field by field, little-endian.
    fn store_proc<W: Write>(proc: &Self::Proc, w: &mut W) -> std::io::Result<()>;

    /// Inverse of `store_proc`.
    fn load_proc<R: Read>(r: &mut R) -> std::io::Result<Self::Proc>;
}
