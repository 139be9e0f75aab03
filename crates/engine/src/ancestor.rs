//! Ancestor assembler
//!
//! Reads a mnemonic-per-line text file and stamps the instructions into a
//! core's memory, one byte per line, starting at the core's ancestor base
//! address. Lookups go through the 256-entry mnemonic table built at
//! engine construction; the first matching index wins, which always
//! resolves to the canonical low opcode.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::arch::Architecture;
use crate::core::Core;
use crate::error::{EngineError, Result};

/// Assemble one ancestor file into `core`. Returns the byte count.
/// Unknown mnemonics and unreadable files are fatal configuration errors.
pub(crate) fn assemble<A: Architecture>(
    core: &mut Core<A>,
    path: &Path,
    mnemonics: &[&'static str],
) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let base = core.anc_base();
    let mut size = 0u64;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();

        let inst = mnemonics
            .iter()
            .position(|&m| m == line)
            .ok_or_else(|| EngineError::UnknownMnemonic {
                file: path.to_path_buf(),
                line_no: index + 1,
                line: line.to_string(),
            })?;

        if size >= core.mem().len() {
            return Err(EngineError::Config(format!(
                "ancestor {} exceeds memory size",
                path.display()
            )));
        }

        let addr = base.wrapping_add(size);
        core.mem_mut().alloc(addr);
        core.mem_mut().set_inst(addr, inst as u8);
        size += 1;
    }

    log::debug!("assembled {} bytes from {}", size, path.display());
    Ok(size)
}
