//! Salis simulation engine
//!
//! An artificial-life simulator: a set of parallel virtual machines whose
//! byte-addressed memories host self-replicating bytecode organisms.
//! Processes execute a small instruction set that manipulates allocated
//! memory blocks and reproduces by splitting; a cosmic-ray mutator
//! perturbs memory; when a core's memory fills past half, the oldest
//! processes are culled. Across cores, per-core IPC buffers rotate in a
//! ring at sync boundaries so mutations gossip between cores.
//!
//! The engine is generic over an [`Architecture`] (the bytecode ISA);
//! [`arch::v1::SalisV1`] is the shipped instruction set. A typical
//! harness:
//!
//! ```no_run
//! use salis_engine::{arch::v1::SalisV1, Config, Engine};
//!
//! let config = Config {
//!     core_count: 2,
//!     anc_list: vec!["ancestor.anc".into(), "_".into()],
//!     seed: 0x5a115,
//!     ..Config::default()
//! };
//! let mut engine = Engine::<SalisV1>::new(config)?;
//! engine.step(100_000)?;
//! engine.save("salis.sim".as_ref())?;
//! # Ok::<(), salis_engine::EngineError>(())
//! ```

pub mod arch;
pub mod config;
pub mod core;
pub mod error;
pub mod ipc;
pub mod memory;
pub mod prng;
pub mod table;

mod ancestor;
mod engine;
mod persist;
mod pool;

pub use crate::arch::Architecture;
pub use crate::config::{Config, MutationKind};
pub use crate::core::Core;
pub use crate::engine::Engine;
pub use crate::error::{EngineError, Result};
