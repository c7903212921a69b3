//! Per-thread sample buffers filled by the recorders.
//!
//! Each thread gets its own fixed-capacity buffer. The buffer is allocated by
//! [`attach_thread`] (or the first [`drain`]), never by a recorder: a thread
//! that records before attaching, or whose buffer is full, drops the sample
//! and counts it as overflow. The recording path never allocates, blocks or
//! panics.

use crate::call_site::CallSiteId;
use crate::pmc::MAX_PMC;
use crate::probe_data::ProbeData;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Samples held per thread unless changed with [`set_capacity`].
pub const DEFAULT_CAPACITY: usize = 4096;

static CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_CAPACITY);

/// One probe firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub call_site: CallSiteId,
    pub tsc: u64,
    pub data: Option<ProbeData>,
    pmc_count: u8,
    pmc: [u64; MAX_PMC],
}

impl Sample {
    #[inline(always)]
    pub(crate) fn new(
        call_site: CallSiteId,
        tsc: u64,
        data: Option<ProbeData>,
        pmc_count: u8,
        pmc: [u64; MAX_PMC],
    ) -> Self {
        Self {
            call_site,
            tsc,
            data,
            pmc_count,
            pmc,
        }
    }

    /// Number of counters the recorder that produced this sample read.
    pub fn pmc_count(&self) -> u8 {
        self.pmc_count
    }

    /// Counter values in program order (generic counters first, then fixed).
    pub fn pmc(&self) -> &[u64] {
        &self.pmc[..self.pmc_count as usize]
    }
}

struct SampleBuffer {
    samples: Vec<Sample>,
    capacity: usize,
    overflow: u64,
}

impl SampleBuffer {
    /// No storage yet; every push overflows.
    const fn detached() -> Self {
        Self {
            samples: Vec::new(),
            capacity: 0,
            overflow: 0,
        }
    }

    fn is_attached(&self) -> bool {
        self.capacity > 0
    }

    fn attach(&mut self, capacity: usize) {
        if !self.is_attached() {
            self.capacity = capacity.max(1);
            self.samples = Vec::with_capacity(self.capacity);
        }
    }

    #[inline(always)]
    fn push(&mut self, sample: Sample) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.overflow += 1;
        }
    }

    fn drain(&mut self) -> Vec<Sample> {
        std::mem::replace(&mut self.samples, Vec::with_capacity(self.capacity))
    }
}

thread_local! {
    static BUFFER: RefCell<SampleBuffer> = const { RefCell::new(SampleBuffer::detached()) };
}

#[inline(always)]
pub(crate) fn push(sample: Sample) {
    // Thread-local storage is gone during thread teardown; drop the sample then.
    let _ = BUFFER.try_with(|buffer| {
        if let Ok(mut buffer) = buffer.try_borrow_mut() {
            buffer.push(sample);
        }
    });
}

/// Give the calling thread its sample buffer. Call before the thread's first
/// probe fires; later calls do nothing.
pub fn attach_thread() {
    let _ = BUFFER.try_with(|buffer| buffer.borrow_mut().attach(capacity()));
}

/// Whether the calling thread has a buffer to record into.
pub fn is_attached() -> bool {
    BUFFER
        .try_with(|buffer| buffer.borrow().is_attached())
        .unwrap_or(false)
}

/// Capacity for buffers of threads that have not attached yet.
pub fn set_capacity(capacity: usize) {
    CAPACITY.store(capacity.max(1), Ordering::Relaxed);
}

pub fn capacity() -> usize {
    CAPACITY.load(Ordering::Relaxed)
}

/// Take every sample recorded so far by the calling thread. Attaches the
/// thread if it was not attached yet.
pub fn drain() -> Vec<Sample> {
    BUFFER
        .try_with(|buffer| {
            let mut buffer = buffer.borrow_mut();
            buffer.attach(capacity());
            buffer.drain()
        })
        .unwrap_or_default()
}

/// Samples recorded by the calling thread and not yet drained.
pub fn pending() -> usize {
    BUFFER
        .try_with(|buffer| buffer.borrow().samples.len())
        .unwrap_or(0)
}

/// Samples the calling thread dropped, because its buffer was full or it
/// recorded before attaching.
pub fn overflow() -> u64 {
    BUFFER
        .try_with(|buffer| buffer.borrow().overflow)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tsc: u64) -> Sample {
        Sample::new(CallSiteId::from_raw(0x10), tsc, None, 0, [0; MAX_PMC])
    }

    #[test]
    fn test_full_buffer_counts_overflow() {
        let mut buffer = SampleBuffer::detached();
        buffer.attach(2);
        buffer.push(sample(1));
        buffer.push(sample(2));
        buffer.push(sample(3));
        assert_eq!(buffer.overflow, 1);

        let drained = buffer.drain();
        assert_eq!(drained.iter().map(|s| s.tsc).collect::<Vec<_>>(), [1, 2]);
        assert!(buffer.samples.is_empty());
        assert_eq!(buffer.samples.capacity(), 2);
    }

    #[test]
    fn test_thread_buffers_are_isolated() {
        attach_thread();
        push(sample(7));
        let other = std::thread::spawn(|| {
            attach_thread();
            push(sample(8));
            drain()
        })
        .join()
        .unwrap();

        assert_eq!(other.len(), 1);
        assert_eq!(other[0].tsc, 8);
        let mine = drain();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].tsc, 7);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn test_detached_thread_counts_overflow() {
        let (attached, pending, overflow) = std::thread::spawn(|| {
            push(sample(1));
            push(sample(2));
            (is_attached(), pending(), overflow())
        })
        .join()
        .unwrap();
        assert!(!attached);
        assert_eq!(pending, 0);
        assert_eq!(overflow, 2);
    }

    #[test]
    fn test_attach_is_idempotent() {
        std::thread::spawn(|| {
            attach_thread();
            push(sample(1));
            attach_thread();
            assert!(is_attached());
            assert_eq!(pending(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_pmc_slice_follows_count() {
        let mut pmc = [0; MAX_PMC];
        pmc[0] = 5;
        pmc[1] = 6;
        let sample = Sample::new(CallSiteId::from_raw(1), 0, None, 2, pmc);
        assert_eq!(sample.pmc(), &[5, 6]);
    }
}
