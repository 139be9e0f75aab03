//! Multi-core simulation driver
//!
//! Owns the cores, the global step/sync counters, the shared mnemonic
//! table and the worker pool. Stepping proceeds in chunks that land
//! exactly on sync boundaries; at each boundary the IPC buffers rotate
//! one core forward so mutations gossip around the ring, and the engine
//! auto-saves when configured to.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::ancestor;
use crate::arch::Architecture;
use crate::config::Config;
use crate::core::{Core, CoreParams};
use crate::error::{EngineError, Result};
use crate::persist;
use crate::pool::WorkerPool;
use crate::prng::{Prng, SplitMix64};

/// The simulation engine: N cores, a worker pool and the global counters.
pub struct Engine<A: Architecture> {
    config: Config,
    cores: Vec<Core<A>>,
    steps: u64,
    syncs: u64,
    mnemonics: Vec<&'static str>,
    pool: WorkerPool<A>,
}

impl<A: Architecture> Engine<A> {
    /// Build a fresh simulation: seed the per-core PRNGs from one
    /// SplitMix64 stream, assemble the ancestors, let the architecture
    /// stamp its seed processes, and auto-save the initial snapshot when
    /// auto-saving is enabled.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let mnemonics = mnemonic_table::<A>();
        let params = CoreParams::from_config(&config);
        let mut stream = SplitMix64::new(config.seed);
        let mut cores = Vec::with_capacity(config.core_count);

        for (cix, anc) in config.anc_list.iter().enumerate() {
            let mut core = Core::new(config.mvec_size, config.sync_interval, params);

            if stream.state() != 0 {
                core.set_prng(Prng::seeded(&mut stream));
            }

            let size = if anc == "_" {
                0
            } else {
                ancestor::assemble(&mut core, Path::new(anc), &mnemonics)?
            };

            if size > config.mvec_size / config.anc_clones {
                return Err(EngineError::Config(format!(
                    "ancestor {anc:?} ({size} bytes) does not fit {} clones in {:#x} bytes",
                    config.anc_clones, config.mvec_size
                )));
            }

            A::anc_init(&mut core, size);
            log::info!(
                "core {cix}: ancestor {anc:?}, {size} bytes, {} processes",
                core.procs().pnum()
            );
            cores.push(core);
        }

        let pool = WorkerPool::new(config.core_count)?;
        let engine = Self {
            config,
            cores,
            steps: 0,
            syncs: 0,
            mnemonics,
            pool,
        };
        engine.auto_save()?;
        Ok(engine)
    }

    /// Restore the simulation from `config.sim_path`.
    pub fn load(config: Config) -> Result<Self> {
        let path = config.sim_path.clone();
        Self::load_from(config, &path)
    }

    /// Restore the simulation from an explicit snapshot path.
    pub fn load_from(config: Config, path: &Path) -> Result<Self> {
        config.validate()?;

        let mut reader = BufReader::new(File::open(path)?);
        persist::read_header(&mut reader, &config)?;

        let params = CoreParams::from_config(&config);
        let mut cores = Vec::with_capacity(config.core_count);
        for _ in 0..config.core_count {
            cores.push(persist::read_core::<A, _>(
                &mut reader,
                config.mvec_size,
                config.sync_interval,
                params,
            )?);
        }

        let steps = persist::read_u64(&mut reader)?;
        let syncs = persist::read_u64(&mut reader)?;
        log::info!("restored {} from step {steps:#x}", path.display());

        let pool = WorkerPool::new(config.core_count)?;
        Ok(Self {
            config,
            cores,
            steps,
            syncs,
            mnemonics: mnemonic_table::<A>(),
            pool,
        })
    }

    /// Dump the complete simulation state.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        persist::write_header(&mut writer, &self.config)?;
        for core in &self.cores {
            persist::write_core(&mut writer, core)?;
        }
        persist::write_u64(&mut writer, self.steps)?;
        persist::write_u64(&mut writer, self.syncs)?;
        writer.flush()?;

        log::debug!("snapshot written to {}", path.display());
        Ok(())
    }

    /// Advance the simulation by `ns` steps (0 is a no-op). Chunks are
    /// capped so sync boundaries land exactly on multiples of the sync
    /// interval.
    pub fn step(&mut self, ns: u64) -> Result<()> {
        let mut remaining = ns;
        let mut dt = self.config.sync_interval - self.steps % self.config.sync_interval;

        loop {
            if remaining < dt {
                self.run_chunk(remaining);
                break;
            }

            self.run_chunk(dt);
            self.sync();
            self.auto_save()?;

            remaining -= dt;
            dt = self.config.sync_interval;
        }

        #[cfg(debug_assertions)]
        self.validate();

        Ok(())
    }

    /// Total steps across all cores (monotonic).
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Completed sync windows.
    pub fn syncs(&self) -> u64 {
        self.syncs
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn core(&self, index: usize) -> &Core<A> {
        &self.cores[index]
    }

    /// Architecture-level access; scripted plugs and tests use this to
    /// construct states the engine API alone cannot reach.
    pub fn core_mut(&mut self, index: usize) -> &mut Core<A> {
        &mut self.cores[index]
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The 256-entry mnemonic table built at construction.
    pub fn mnemonics(&self) -> &[&'static str] {
        &self.mnemonics
    }

    /// Run one chunk: every core steps `dt` times in parallel on its
    /// worker; the cores move back here before anything else happens.
    fn run_chunk(&mut self, dt: u64) {
        if dt == 0 {
            return;
        }

        let cores = std::mem::take(&mut self.cores);
        let count = cores.len();
        for (index, core) in cores.into_iter().enumerate() {
            self.pool.dispatch(index, core, dt);
        }

        let mut slots: Vec<Option<Core<A>>> = std::iter::repeat_with(|| None).take(count).collect();
        for _ in 0..count {
            let (index, core) = self.pool.collect();
            slots[index] = Some(core);
        }
        self.cores = slots
            .into_iter()
            .map(|slot| slot.expect("worker returned no core"))
            .collect();

        self.steps += dt;
    }

    /// Rotate the IPC slot buffers one core forward (core i-1 receives
    /// core i's, the last receives the first's) and reset every cursor.
    fn sync(&mut self) {
        let mut slots: Vec<_> = self
            .cores
            .iter_mut()
            .map(|core| core.ipc_mut().take_slots())
            .collect();
        slots.rotate_left(1);

        for (core, pair) in self.cores.iter_mut().zip(slots) {
            core.ipc_mut().set_slots(pair);
            core.ipc_mut().reset_cursor();
        }

        self.syncs += 1;
        log::trace!("sync {} at step {:#x}", self.syncs, self.steps);
    }

    /// Write `"<sim_path>-<steps>"` when the step count lands on the
    /// auto-save interval.
    fn auto_save(&self) -> Result<()> {
        if self.config.autosave_interval == 0 || self.steps % self.config.autosave_interval != 0 {
            return Ok(());
        }
        self.save(&auto_save_path(&self.config.sim_path, self.steps))
    }

    #[cfg(debug_assertions)]
    fn validate(&self) {
        assert_eq!(self.steps / self.config.sync_interval, self.syncs);

        for core in &self.cores {
            core.validate();
            assert!(core.procs().ncyc() <= self.steps);
            assert_eq!(core.ipc().ivpt(), self.steps % self.config.sync_interval);
        }
    }
}

/// Auto-save naming: the base path with the hex step count appended.
pub(crate) fn auto_save_path(sim_path: &Path, steps: u64) -> PathBuf {
    PathBuf::from(format!("{}-{steps:#018x}", sim_path.display()))
}

fn mnemonic_table<A: Architecture>() -> Vec<&'static str> {
    (0..=255u8).map(A::mnemonic).collect()
}
