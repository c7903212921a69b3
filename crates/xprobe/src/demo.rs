//! Demo workload: tasks that run in quanta across a pool of threads.
//!
//! A task begins a transaction on the first thread it runs on, suspends it
//! after every quantum and is handed to the next thread, which resumes it.
//! The last quantum ends the transaction.

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info};
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use xprobe_trace::{Sample, TxnId, sample};

/// Controls whether user space may execute `rdpmc`.
pub const RDPMC_SYSFS: &str = "/sys/bus/event_source/devices/cpu/rdpmc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoConfig {
    pub threads: usize,
    pub txns: usize,
    pub quanta: u32,
    /// Sleep per quantum.
    pub work: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            txns: 100,
            quanta: 4,
            work: Duration::ZERO,
        }
    }
}

/// Samples recorded by every worker, tagged with the worker's number.
pub struct DemoOutcome {
    pub streams: Vec<(u64, Vec<Sample>)>,
    pub overflow: u64,
    pub elapsed: Duration,
}

struct Task {
    id: u64,
    quantum: u32,
    time_to_live: u32,
    work: Duration,
    txn: Option<TxnId>,
}

enum Message {
    Run(Task),
    Stop,
}

impl Task {
    fn run_quantum(mut self, workers: &[Sender<Message>], done: &Sender<u64>) -> Result<()> {
        match self.txn.take() {
            None => xprobe_trace::txn_begin!(TaskBegin),
            Some(id) => xprobe_trace::txn_resume!(TaskResume, id),
        }

        self.quantum += 1;
        xprobe_trace::data_probe!(TaskQuantum, (self.id, self.quantum as u64));
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }

        if self.quantum <= self.time_to_live {
            self.txn = Some(xprobe_trace::txn_suspend!(TaskSuspend));
            let next = self.quantum as usize % workers.len();
            return workers[next]
                .send(Message::Run(self))
                .map_err(|_| Error::Disconnected);
        }

        xprobe_trace::txn_end!(TaskEnd);
        done.send(self.id).map_err(|_| Error::Disconnected)
    }
}

fn worker(
    inbox: Receiver<Message>,
    workers: Vec<Sender<Message>>,
    done: Sender<u64>,
) -> Result<(Vec<Sample>, u64)> {
    sample::attach_thread();
    for message in inbox.iter() {
        match message {
            Message::Run(task) => task.run_quantum(&workers, &done)?,
            Message::Stop => break,
        }
    }
    Ok((sample::drain(), sample::overflow()))
}

/// Run `txns` tasks of `quanta + 1` quanta each over `threads` workers.
pub fn run(config: &DemoConfig) -> Result<DemoOutcome> {
    if config.threads == 0 {
        return Err(Error::InvalidArgument("demo needs at least one thread".into()));
    }

    let (senders, inboxes): (Vec<_>, Vec<_>) = (0..config.threads).map(|_| unbounded()).unzip();
    let (done_tx, done_rx) = unbounded();
    let started = Instant::now();

    let mut handles = Vec::with_capacity(config.threads);
    for (index, inbox) in inboxes.into_iter().enumerate() {
        let workers = senders.clone();
        let done = done_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("xprobe-worker-{index}"))
            .spawn(move || worker(inbox, workers, done))?;
        handles.push(handle);
    }
    drop(done_tx);

    for id in 0..config.txns as u64 {
        let task = Task {
            id,
            quantum: 0,
            time_to_live: config.quanta,
            work: config.work,
            txn: None,
        };
        let first = id as usize % senders.len();
        senders[first]
            .send(Message::Run(task))
            .map_err(|_| Error::Disconnected)?;
    }

    for _ in 0..config.txns {
        let id = done_rx.recv().map_err(|_| Error::Disconnected)?;
        debug!("task {id} completed");
    }
    for sender in &senders {
        // a worker that already failed has dropped its inbox
        let _ = sender.send(Message::Stop);
    }

    let mut streams = Vec::with_capacity(handles.len());
    let mut overflow = 0;
    for (index, handle) in handles.into_iter().enumerate() {
        let (samples, dropped) = handle
            .join()
            .map_err(|_| Error::Io(io::Error::other("demo worker panicked")))??;
        overflow += dropped;
        streams.push((index as u64 + 1, samples));
    }

    let elapsed = started.elapsed();
    info!(
        "ran {} transactions over {} threads in {}",
        config.txns,
        config.threads,
        humantime::format_duration(elapsed)
    );
    Ok(DemoOutcome {
        streams,
        overflow,
        elapsed,
    })
}

/// Reading counters faults unless user-space `rdpmc` is allowed for every
/// process (`2` in sysfs).
pub fn check_rdpmc_access() -> Result<()> {
    let setting = std::fs::read_to_string(RDPMC_SYSFS)?;
    if setting.trim() == "2" {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "reading counters needs user-space rdpmc - run `echo 2 > {RDPMC_SYSFS}` (currently {})",
            setting.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionConfig};

    #[test]
    fn test_demo_transactions_complete_across_threads() {
        let config = DemoConfig {
            threads: 3,
            txns: 12,
            quanta: 2,
            ..DemoConfig::default()
        };
        let outcome = run(&config).unwrap();
        assert_eq!(outcome.streams.len(), 3);
        assert_eq!(outcome.overflow, 0);

        let session = Session::new(SessionConfig::default());
        for name in ["TaskBegin", "TaskResume", "TaskSuspend", "TaskEnd", "TaskQuantum"] {
            assert!(
                session.registry().find_by_name(name).is_some(),
                "{name} not attached"
            );
        }

        let stitched = session.stitch(&outcome.streams);
        assert_eq!(stitched.transactions.len(), 12);
        assert!(stitched.orphan_resumes.is_empty());
        assert!(stitched.violations.is_empty());
        for txn in &stitched.transactions {
            assert_eq!(txn.state, xprobe_trace::TxnState::Ended);
            assert_eq!(txn.segments.len(), 3);
            assert!(txn.threads().len() > 1);
        }
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = DemoConfig {
            threads: 0,
            ..DemoConfig::default()
        };
        assert!(matches!(run(&config), Err(Error::InvalidArgument(_))));
    }
}
