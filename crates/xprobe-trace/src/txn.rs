//! Transaction lifecycle: begin, suspend, resume and end probes.
//!
//! The recording side does no bookkeeping beyond minting a [`TxnId`] at
//! suspend time. Which transition a probe performs is fixed by the macro used
//! at its call site. Transactions are put back together offline by the
//! [`Stitcher`], which follows suspend/resume ids across threads.

use crate::call_site::{CallSiteAttrs, CallSiteId};
use crate::error::{Error, Result};
use crate::probe_data::ProbeData;
use crate::sample::Sample;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Correlates a suspend sample with its resume sample, possibly on another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(u128);

impl TxnId {
    /// Timestamp in the high half, a process-wide sequence in the low half.
    pub fn mint(tsc: u64) -> Self {
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self((tsc as u128) << 64 | sequence as u128)
    }

    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u128 {
        self.0
    }
}

impl From<TxnId> for ProbeData {
    fn from(id: TxnId) -> Self {
        ProbeData::new(id.0)
    }
}

impl From<ProbeData> for TxnId {
    fn from(data: ProbeData) -> Self {
        Self(data.value())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    Active,
    Suspended,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnEvent {
    Begin,
    Suspend(TxnId),
    Resume(TxnId),
    End,
}

impl TxnEvent {
    /// Transition performed by a sample from a site with `attrs`, if any.
    pub fn classify(attrs: CallSiteAttrs, data: Option<ProbeData>) -> Option<Self> {
        if attrs.can_begin_txn() {
            Some(TxnEvent::Begin)
        } else if attrs.can_suspend_txn() {
            Some(TxnEvent::Suspend(TxnId::from(data.unwrap_or_default())))
        } else if attrs.can_resume_txn() {
            Some(TxnEvent::Resume(TxnId::from(data.unwrap_or_default())))
        } else if attrs.can_end_txn() {
            Some(TxnEvent::End)
        } else {
            None
        }
    }
}

impl TxnState {
    /// Next state, or `InvalidTransition`. A new begin is allowed from
    /// `Idle` and `Ended`.
    pub fn apply(self, event: TxnEvent) -> Result<TxnState> {
        match (self, event) {
            (TxnState::Idle | TxnState::Ended, TxnEvent::Begin) => Ok(TxnState::Active),
            (TxnState::Active, TxnEvent::Suspend(_)) => Ok(TxnState::Suspended),
            (TxnState::Suspended, TxnEvent::Resume(_)) => Ok(TxnState::Active),
            (TxnState::Active, TxnEvent::End) => Ok(TxnState::Ended),
            (from, event) => Err(Error::InvalidTransition {
                from: format!("{from:?}"),
                event: format!("{event:?}"),
            }),
        }
    }
}

/// How a run of samples on one thread was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStart {
    Begin,
    Resume(TxnId),
}

/// How a run of samples on one thread was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    Suspend(TxnId),
    End,
    /// A new begin or resume arrived on the thread before this run was closed.
    Interrupted,
    /// Still running when the samples were collected.
    Open,
}

/// Consecutive samples of one transaction on one thread.
#[derive(Debug, Clone)]
pub struct Segment {
    pub thread: u64,
    pub start: SegmentStart,
    pub end: SegmentEnd,
    pub samples: Vec<Sample>,
}

/// A transaction rebuilt from its segments, in execution order.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub segments: Vec<Segment>,
    pub state: TxnState,
}

impl Transaction {
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.segments.iter().flat_map(|segment| segment.samples.iter())
    }

    pub fn threads(&self) -> Vec<u64> {
        let mut threads: Vec<u64> = self.segments.iter().map(|s| s.thread).collect();
        threads.dedup();
        threads
    }

    /// Ticks from the first to the last sample.
    pub fn span(&self) -> u64 {
        let first = self.samples().next().map(|s| s.tsc).unwrap_or(0);
        let last = self.samples().last().map(|s| s.tsc).unwrap_or(first);
        last.saturating_sub(first)
    }
}

#[derive(Debug, Default)]
pub struct Stitched {
    pub transactions: Vec<Transaction>,
    /// Resumed with an id no collected suspend produced. Kept as-is.
    pub orphan_resumes: Vec<Segment>,
    /// Lifecycle violations seen while replaying transactions.
    pub violations: Vec<Error>,
    /// Samples fired outside any transaction.
    pub untracked: usize,
}

/// Rebuilds transactions from per-thread sample streams.
pub struct Stitcher<F> {
    attrs: F,
    segments: Vec<Segment>,
    untracked: usize,
    stray: Vec<Error>,
}

impl<F> Stitcher<F>
where
    F: Fn(CallSiteId) -> Option<CallSiteAttrs>,
{
    /// `attrs` resolves a sample's call site to its capability flags.
    pub fn new(attrs: F) -> Self {
        Self {
            attrs,
            segments: Vec::new(),
            untracked: 0,
            stray: Vec::new(),
        }
    }

    /// Add every sample one thread recorded, in recording order.
    pub fn feed(&mut self, thread: u64, samples: &[Sample]) {
        let mut open: Option<Segment> = None;

        for sample in samples {
            let event = (self.attrs)(sample.call_site)
                .and_then(|attrs| TxnEvent::classify(attrs, sample.data));

            match event {
                Some(TxnEvent::Begin) | Some(TxnEvent::Resume(_)) => {
                    if let Some(mut segment) = open.take() {
                        segment.end = SegmentEnd::Interrupted;
                        self.segments.push(segment);
                    }
                    let start = match event {
                        Some(TxnEvent::Resume(id)) => SegmentStart::Resume(id),
                        _ => SegmentStart::Begin,
                    };
                    open = Some(Segment {
                        thread,
                        start,
                        end: SegmentEnd::Open,
                        samples: vec![*sample],
                    });
                }
                Some(close @ (TxnEvent::Suspend(_) | TxnEvent::End)) => match open.take() {
                    Some(mut segment) => {
                        segment.samples.push(*sample);
                        segment.end = match close {
                            TxnEvent::Suspend(id) => SegmentEnd::Suspend(id),
                            _ => SegmentEnd::End,
                        };
                        self.segments.push(segment);
                    }
                    None => {
                        self.untracked += 1;
                        self.stray.push(Error::InvalidTransition {
                            from: format!("{:?}", TxnState::Idle),
                            event: format!("{close:?}"),
                        });
                    }
                },
                None => match open.as_mut() {
                    Some(segment) => segment.samples.push(*sample),
                    None => self.untracked += 1,
                },
            }
        }

        if let Some(segment) = open {
            self.segments.push(segment);
        }
    }

    /// Chain segments through their suspend/resume ids.
    pub fn finish(self) -> Stitched {
        let Stitcher {
            segments,
            untracked,
            stray,
            ..
        } = self;

        let mut resumed_by: HashMap<TxnId, usize> = HashMap::new();
        for (index, segment) in segments.iter().enumerate() {
            if let SegmentStart::Resume(id) = segment.start {
                resumed_by.insert(id, index);
            }
        }

        let mut stitched = Stitched {
            untracked,
            violations: stray,
            ..Stitched::default()
        };
        let mut claimed = HashSet::new();
        let mut chains = Vec::new();

        for (index, segment) in segments.iter().enumerate() {
            if segment.start != SegmentStart::Begin {
                continue;
            }
            let mut chain = vec![index];
            claimed.insert(index);
            let mut cursor = index;
            while let SegmentEnd::Suspend(id) = segments[cursor].end {
                match resumed_by.get(&id) {
                    Some(&next) if claimed.insert(next) => {
                        chain.push(next);
                        cursor = next;
                    }
                    _ => break,
                }
            }
            chains.push(chain);
        }

        let mut segments: Vec<Option<Segment>> = segments.into_iter().map(Some).collect();

        for chain in chains {
            let mut state = TxnState::Idle;
            let mut parts = Vec::with_capacity(chain.len());
            for index in chain {
                let Some(segment) = segments[index].take() else {
                    continue;
                };
                let entry = match segment.start {
                    SegmentStart::Begin => TxnEvent::Begin,
                    SegmentStart::Resume(id) => TxnEvent::Resume(id),
                };
                let exit = match segment.end {
                    SegmentEnd::Suspend(id) => Some(TxnEvent::Suspend(id)),
                    SegmentEnd::End => Some(TxnEvent::End),
                    SegmentEnd::Interrupted | SegmentEnd::Open => None,
                };
                for event in std::iter::once(entry).chain(exit) {
                    match state.apply(event) {
                        Ok(next) => state = next,
                        Err(err) => stitched.violations.push(err),
                    }
                }
                parts.push(segment);
            }
            stitched.transactions.push(Transaction {
                segments: parts,
                state,
            });
        }

        // whatever was never reached from a begin
        stitched.orphan_resumes = segments.into_iter().flatten().collect();
        stitched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmc::MAX_PMC;

    const BEGIN: CallSiteId = CallSiteId::from_raw(1);
    const SUSPEND: CallSiteId = CallSiteId::from_raw(2);
    const RESUME: CallSiteId = CallSiteId::from_raw(3);
    const END: CallSiteId = CallSiteId::from_raw(4);
    const WORK: CallSiteId = CallSiteId::from_raw(5);

    fn attrs(site: CallSiteId) -> Option<CallSiteAttrs> {
        match site.as_raw() {
            1 => Some(CallSiteAttrs::CAN_BEGIN_TXN),
            2 => Some(CallSiteAttrs::CAN_SUSPEND_TXN),
            3 => Some(CallSiteAttrs::CAN_RESUME_TXN | CallSiteAttrs::CAN_STORE_DATA),
            4 => Some(CallSiteAttrs::CAN_END_TXN),
            5 => Some(CallSiteAttrs::NONE),
            _ => None,
        }
    }

    fn sample(site: CallSiteId, tsc: u64, data: Option<TxnId>) -> Sample {
        Sample::new(site, tsc, data.map(ProbeData::from), 0, [0; MAX_PMC])
    }

    #[test]
    fn test_state_transitions() {
        let id = TxnId::from_raw(9);
        let state = TxnState::Idle.apply(TxnEvent::Begin).unwrap();
        let state = state.apply(TxnEvent::Suspend(id)).unwrap();
        assert_eq!(state, TxnState::Suspended);
        assert!(state.apply(TxnEvent::End).is_err());
        let state = state.apply(TxnEvent::Resume(id)).unwrap();
        let state = state.apply(TxnEvent::End).unwrap();
        assert_eq!(state, TxnState::Ended);
        // a new begin starts a fresh cycle
        assert_eq!(state.apply(TxnEvent::Begin).unwrap(), TxnState::Active);
    }

    #[test]
    fn test_minted_ids_are_unique() {
        let a = TxnId::mint(42);
        let b = TxnId::mint(42);
        assert_ne!(a, b);
        assert_eq!(a.as_raw() >> 64, 42);
    }

    #[test]
    fn test_stitch_across_threads() {
        let x = TxnId::from_raw(0xaa);
        let y = TxnId::from_raw(0xbb);
        let mut stitcher = Stitcher::new(attrs);

        // fed out of order on purpose
        stitcher.feed(
            2,
            &[
                sample(RESUME, 20, Some(x)),
                sample(WORK, 21, None),
                sample(SUSPEND, 22, Some(y)),
            ],
        );
        stitcher.feed(
            1,
            &[
                sample(WORK, 1, None),
                sample(BEGIN, 10, None),
                sample(SUSPEND, 11, Some(x)),
                sample(RESUME, 30, Some(y)),
                sample(END, 31, None),
            ],
        );

        let stitched = stitcher.finish();
        assert_eq!(stitched.untracked, 1);
        assert!(stitched.violations.is_empty());
        assert!(stitched.orphan_resumes.is_empty());
        assert_eq!(stitched.transactions.len(), 1);

        let txn = &stitched.transactions[0];
        assert_eq!(txn.state, TxnState::Ended);
        assert_eq!(txn.threads(), vec![1, 2, 1]);
        let ticks: Vec<u64> = txn.samples().map(|s| s.tsc).collect();
        assert_eq!(ticks, [10, 11, 20, 21, 22, 30, 31]);
        assert_eq!(txn.span(), 21);
    }

    #[test]
    fn test_unknown_resume_is_reported_not_dropped() {
        let mut stitcher = Stitcher::new(attrs);
        stitcher.feed(
            1,
            &[
                sample(RESUME, 5, Some(TxnId::from_raw(0xdead))),
                sample(END, 6, None),
            ],
        );
        let stitched = stitcher.finish();
        assert!(stitched.transactions.is_empty());
        assert_eq!(stitched.orphan_resumes.len(), 1);
        assert_eq!(
            stitched.orphan_resumes[0].start,
            SegmentStart::Resume(TxnId::from_raw(0xdead))
        );
        assert_eq!(stitched.orphan_resumes[0].end, SegmentEnd::End);
    }

    #[test]
    fn test_end_without_begin_is_a_violation() {
        let mut stitcher = Stitcher::new(attrs);
        stitcher.feed(1, &[sample(END, 1, None)]);
        let stitched = stitcher.finish();
        assert_eq!(stitched.untracked, 1);
        assert_eq!(stitched.violations.len(), 1);
    }
}
