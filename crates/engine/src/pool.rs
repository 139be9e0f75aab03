//! Persistent worker pool
//!
//! One long-lived thread per core, built once at engine construction
//! instead of spawning and joining per step chunk. The driver moves each
//! `Core` value to its worker over a channel together with a step count,
//! and collects the cores back once they ran; the channel hand-off is the
//! only synchronization, so workers share no state and take no locks.

use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::JoinHandle;

use crate::arch::Architecture;
use crate::core::Core;

struct Job<A: Architecture> {
    core: Core<A>,
    steps: u64,
}

pub(crate) struct WorkerPool<A: Architecture> {
    job_txs: Vec<Sender<Job<A>>>,
    done_rx: Receiver<(usize, Core<A>)>,
    handles: Vec<JoinHandle<()>>,
}

impl<A: Architecture> WorkerPool<A> {
    pub fn new(core_count: usize) -> io::Result<Self> {
        let (done_tx, done_rx) = channel();
        let mut job_txs = Vec::with_capacity(core_count);
        let mut handles = Vec::with_capacity(core_count);

        for index in 0..core_count {
            let (job_tx, job_rx) = channel::<Job<A>>();
            let done_tx = done_tx.clone();

            let handle = std::thread::Builder::new()
                .name(format!("salis-core-{index}"))
                .spawn(move || {
                    while let Ok(Job { mut core, steps }) = job_rx.recv() {
                        for _ in 0..steps {
                            core.step();
                        }
                        if done_tx.send((index, core)).is_err() {
                            break;
                        }
                    }
                })?;

            job_txs.push(job_tx);
            handles.push(handle);
        }

        Ok(Self {
            job_txs,
            done_rx,
            handles,
        })
    }

    /// Hand a core to its worker. Panics if the worker died, which only
    /// happens after a core hit a contract violation.
    pub fn dispatch(&self, index: usize, core: Core<A>, steps: u64) {
        self.job_txs[index]
            .send(Job { core, steps })
            .expect("worker thread exited");
    }

    /// Collect one stepped core, in completion order.
    pub fn collect(&self) -> (usize, Core<A>) {
        self.done_rx.recv().expect("worker thread exited")
    }
}

impl<A: Architecture> Drop for WorkerPool<A> {
    fn drop(&mut self) {
        // closing the job channels ends the worker loops
        self.job_txs.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::v1::SalisV1;
    use crate::config::MutationKind;
    use crate::core::CoreParams;

    fn test_core() -> Core<SalisV1> {
        Core::new(
            64,
            0x100,
            CoreParams {
                muta_range: u64::MAX,
                mutation: MutationKind::Overwrite,
                anc_clones: 1,
                anc_half: false,
            },
        )
    }

    #[test]
    fn test_dispatch_collect_round_trip() {
        let pool: WorkerPool<SalisV1> = WorkerPool::new(2).unwrap();
        pool.dispatch(0, test_core(), 5);
        pool.dispatch(1, test_core(), 5);

        let mut seen = [false; 2];
        for _ in 0..2 {
            let (index, core) = pool.collect();
            seen[index] = true;
            // one lone process, slice 1: every step completes a cycle
            assert_eq!(core.procs().ncyc(), 5);
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn test_workers_survive_multiple_chunks() {
        let pool: WorkerPool<SalisV1> = WorkerPool::new(1).unwrap();
        let mut core = test_core();
        for _ in 0..4 {
            pool.dispatch(0, core, 3);
            core = pool.collect().1;
        }
        assert_eq!(core.procs().ncyc(), 12);
    }
}
