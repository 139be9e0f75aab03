//! Engine configuration
//!
//! Every simulation parameter lives here as a runtime value so harnesses
//! and tests can parameterize over them: core count, memory geometry,
//! sync window, ancestor seeding, PRNG seed, mutation behavior and
//! auto-saving. The choice between a fresh run and a restored one is the
//! caller's ([`Engine::new`] vs [`Engine::load`]); the instruction set is
//! the engine's generic architecture parameter.
//!
//! [`Engine::new`]: crate::Engine::new
//! [`Engine::load`]: crate::Engine::load

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// How the cosmic ray perturbs a memory byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// XOR a single random bit within the instruction bits.
    FlipBit,
    /// Overwrite the instruction bits with a random instruction.
    Overwrite,
}

/// Runtime configuration for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of parallel cores (>= 1).
    pub core_count: usize,
    /// Bytes of memory per core. Power of two recommended; address
    /// wrapping uses modulo either way.
    pub mvec_size: u64,
    /// Steps per IPC sync window.
    pub sync_interval: u64,
    /// Ancestor file per core; `"_"` seeds no ancestor on that core.
    pub anc_list: Vec<String>,
    /// Identical ancestor processes stamped per core.
    pub anc_clones: u64,
    /// Place the ancestor at the upper half of the `u64` address space
    /// (aliases physical address 0 for power-of-two memory sizes, but
    /// keeps `ip`/`sp` mid-range, which biases seek directions).
    pub anc_half: bool,
    /// PRNG seed; 0 leaves the per-core PRNGs uninitialised (all-zero
    /// state, constant output).
    pub seed: u64,
    /// Cosmic-ray miss range: a mutation lands when `rng % muta_range`
    /// falls below `mvec_size`.
    pub muta_range: u64,
    /// Cosmic-ray mutation mode.
    pub mutation: MutationKind,
    /// Steps between auto-saves; 0 disables auto-saving.
    pub autosave_interval: u64,
    /// Snapshot path; auto-saves append `-<steps:#018x>`.
    pub sim_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core_count: 1,
            mvec_size: 0x1_0000,
            sync_interval: 0x100,
            anc_list: vec!["_".into()],
            anc_clones: 1,
            anc_half: false,
            seed: 0,
            muta_range: 0x1000_0000,
            mutation: MutationKind::Overwrite,
            autosave_interval: 0,
            sim_path: PathBuf::from("salis.sim"),
        }
    }
}

impl Config {
    /// Check the limits a running engine depends on.
    pub fn validate(&self) -> Result<()> {
        if self.core_count == 0 {
            return Err(EngineError::Config("core_count must be >= 1".into()));
        }
        if self.mvec_size == 0 {
            return Err(EngineError::Config("mvec_size must be >= 1".into()));
        }
        if self.sync_interval == 0 {
            return Err(EngineError::Config("sync_interval must be >= 1".into()));
        }
        if self.muta_range == 0 {
            return Err(EngineError::Config("muta_range must be >= 1".into()));
        }
        if self.anc_clones == 0 {
            return Err(EngineError::Config("anc_clones must be >= 1".into()));
        }
        if self.anc_list.len() != self.core_count {
            return Err(EngineError::Config(format!(
                "anc_list names {} ancestors for {} cores",
                self.anc_list.len(),
                self.core_count
            )));
        }
        Ok(())
    }
}
