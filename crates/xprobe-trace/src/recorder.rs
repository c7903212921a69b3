//! Recorder control - selects and publishes the routine every probe calls through.
//!
//! A [`Dispatch`] owns two immutable tables of recorders, one for plain probes
//! and one for data probes. Slot `N` holds a specialization that reads exactly
//! `N` counters, so the recording routine itself never branches on the
//! configuration. [`RecorderCtl`] tracks which counters the control plane
//! wants and publishes the matching slot with a single atomic store.
//!
//! Slot layout (both tables):
//!
//! | slot   | routine                                   |
//! |--------|-------------------------------------------|
//! | 0      | timestamp only                            |
//! | 1..=11 | timestamp + N counters (generic, fixed)   |
//! | 12..16 | reserved, never activated                 |
//!
//! The published word is a [`CounterConfig`]: the generic counter count and
//! the fixed counter mask packed together. A firing thread loads it once and
//! derives both the slot and the counters it reads from that value, so a
//! sample always matches exactly one configuration.

use crate::call_site::CallSiteId;
use crate::error::{Error, Result};
use crate::fixed_pmc::FixedPmcSet;
use crate::pmc::{CounterSource, MAX_GENERIC_PMC, MAX_PMC, Rdpmc};
use crate::probe_data::ProbeData;
use crate::sample::{self, Sample};
use crate::txn::TxnId;
use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Slots per recorder table.
pub const RECORDER_CAPACITY: usize = 16;

/// Slot of the timestamp-only recorder.
pub const TRIVIAL_SLOT: usize = 0;

/// Slots holding a real specialization; the rest are reserved.
const POPULATED_SLOTS: usize = MAX_PMC + 1;

const GENERIC_BITS: u32 = 4;
const GENERIC_MASK: usize = (1 << GENERIC_BITS) - 1;

/// Records `(call_site, timestamp)`.
pub type Recorder = fn(CounterConfig, CallSiteId, u64);

/// Records `(call_site, timestamp, payload)`.
pub type DataRecorder = fn(CounterConfig, CallSiteId, u64, ProbeData);

/// Which counters a recorder reads, in one word.
///
/// Bits 0..4 hold the generic counter count, bits 4..7 the fixed counter mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterConfig(usize);

impl CounterConfig {
    /// Timestamp only.
    pub const TRIVIAL: Self = Self(0);

    pub fn new(generic_pmc_count: u8, fixed: FixedPmcSet) -> Self {
        let generic = generic_pmc_count.min(MAX_GENERIC_PMC) as usize;
        Self(generic | (fixed.bits() as usize) << GENERIC_BITS)
    }

    pub fn generic_pmc_count(self) -> u8 {
        (self.0 & GENERIC_MASK) as u8
    }

    pub fn fixed_pmc_set(self) -> FixedPmcSet {
        FixedPmcSet::from_bits((self.0 >> GENERIC_BITS) as u8)
    }

    /// Recorder slot for this configuration: the number of counters read.
    #[inline(always)]
    pub fn slot(self) -> usize {
        self.generic_pmc_count() as usize + self.fixed_pmc_set().size() as usize
    }

    /// rdpmc selectors in sample order: generic counters by index, then the
    /// enabled fixed counters. Entries past [`slot`](Self::slot) are zero.
    #[inline(always)]
    pub fn selectors(self) -> [u32; MAX_PMC] {
        let mut selectors = [0u32; MAX_PMC];
        let generic = self.generic_pmc_count() as usize;
        for (index, selector) in selectors.iter_mut().take(generic).enumerate() {
            *selector = index as u32;
        }
        for (selector, counter) in selectors[generic..]
            .iter_mut()
            .zip(self.fixed_pmc_set().iter())
        {
            *selector = counter.rdpmc_selector();
        }
        selectors
    }

    const fn raw(self) -> usize {
        self.0
    }

    const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

#[inline(always)]
fn read_counters<const N: usize, S: CounterSource>(config: CounterConfig) -> [u64; MAX_PMC] {
    let selectors = config.selectors();
    let mut pmc = [0u64; MAX_PMC];
    for (value, selector) in pmc.iter_mut().zip(selectors).take(N) {
        *value = S::read(selector);
    }
    pmc
}

fn record<const N: usize, S: CounterSource>(config: CounterConfig, call_site: CallSiteId, tsc: u64) {
    let pmc = read_counters::<N, S>(config);
    sample::push(Sample::new(call_site, tsc, None, N as u8, pmc));
}

fn record_data<const N: usize, S: CounterSource>(
    config: CounterConfig,
    call_site: CallSiteId,
    tsc: u64,
    data: ProbeData,
) {
    let pmc = read_counters::<N, S>(config);
    sample::push(Sample::new(call_site, tsc, Some(data), N as u8, pmc));
}

macro_rules! recorder_table {
    ($record:ident, $source:ty) => {
        [
            $record::<0, $source>,
            $record::<1, $source>,
            $record::<2, $source>,
            $record::<3, $source>,
            $record::<4, $source>,
            $record::<5, $source>,
            $record::<6, $source>,
            $record::<7, $source>,
            $record::<8, $source>,
            $record::<9, $source>,
            $record::<10, $source>,
            $record::<11, $source>,
            // reserved
            $record::<0, $source>,
            $record::<0, $source>,
            $record::<0, $source>,
            $record::<0, $source>,
        ]
    };
}

/// Recorder tables plus the currently published configuration.
pub struct Dispatch {
    recorders: [Recorder; RECORDER_CAPACITY],
    data_recorders: [DataRecorder; RECORDER_CAPACITY],
    active: AtomicUsize,
}

impl Dispatch {
    /// Build the tables for counter source `S`. Starts on the timestamp-only slot.
    pub const fn new<S: CounterSource>() -> Self {
        let recorders: [Recorder; RECORDER_CAPACITY] = recorder_table!(record, S);
        let data_recorders: [DataRecorder; RECORDER_CAPACITY] = recorder_table!(record_data, S);
        Self {
            recorders,
            data_recorders,
            active: AtomicUsize::new(CounterConfig::TRIVIAL.raw()),
        }
    }

    /// Record a plain probe firing with the active recorder.
    #[inline(always)]
    pub fn record(&self, call_site: CallSiteId, tsc: u64) {
        let config = self.active_config();
        (self.recorders[config.slot()])(config, call_site, tsc);
    }

    /// Record a data probe firing with the active data recorder.
    #[inline(always)]
    pub fn record_data(&self, call_site: CallSiteId, tsc: u64, data: ProbeData) {
        let config = self.active_config();
        (self.data_recorders[config.slot()])(config, call_site, tsc, data);
    }

    #[inline(always)]
    pub fn record_trivial(&self, call_site: CallSiteId, tsc: u64) {
        (self.recorders[TRIVIAL_SLOT])(CounterConfig::TRIVIAL, call_site, tsc);
    }

    #[inline(always)]
    pub fn record_data_trivial(&self, call_site: CallSiteId, tsc: u64, data: ProbeData) {
        (self.data_recorders[TRIVIAL_SLOT])(CounterConfig::TRIVIAL, call_site, tsc, data);
    }

    #[inline(always)]
    pub fn active_config(&self) -> CounterConfig {
        CounterConfig::from_raw(self.active.load(Ordering::Acquire))
    }

    pub fn active_slot(&self) -> usize {
        self.active_config().slot()
    }

    /// Both tables share the encoding, so this always equals [`active_slot`](Self::active_slot).
    pub fn active_data_slot(&self) -> usize {
        self.active_config().slot()
    }

    fn publish(&self, config: CounterConfig) {
        self.active.store(config.raw(), Ordering::Release);
    }
}

static GLOBAL: Dispatch = Dispatch::new::<Rdpmc>();

/// The dispatch the probe macros record through.
pub fn global() -> &'static Dispatch {
    &GLOBAL
}

/// How one probe firing reaches its recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trampoline {
    /// Active plain recorder.
    Record,
    /// Active data recorder.
    RecordData,
    /// Mint a transaction id and store it through the active data recorder.
    RecordIdentity,
    /// Timestamp-only plain recorder, regardless of the active slot.
    Timestamp,
    TimestampData,
    TimestampIdentity,
}

impl Trampoline {
    pub const fn select(can_store_data: bool, can_suspend_txn: bool, non_trivial: bool) -> Self {
        match (can_suspend_txn, can_store_data, non_trivial) {
            (true, _, true) => Trampoline::RecordIdentity,
            (true, _, false) => Trampoline::TimestampIdentity,
            (false, true, true) => Trampoline::RecordData,
            (false, true, false) => Trampoline::TimestampData,
            (false, false, true) => Trampoline::Record,
            (false, false, false) => Trampoline::Timestamp,
        }
    }

    /// Trampoline for a call site declared with `attrs`.
    pub const fn for_attrs(attrs: crate::CallSiteAttrs) -> Self {
        Self::select(attrs.can_store_data(), attrs.can_suspend_txn(), true)
    }

    pub fn is_non_trivial(self) -> bool {
        matches!(
            self,
            Trampoline::Record | Trampoline::RecordData | Trampoline::RecordIdentity
        )
    }

    pub fn mints_txn(self) -> bool {
        matches!(
            self,
            Trampoline::RecordIdentity | Trampoline::TimestampIdentity
        )
    }

    /// Route one firing. Returns the payload that was stored; for identity
    /// trampolines that is the freshly minted transaction id.
    #[inline(always)]
    pub fn enter(self, dispatch: &Dispatch, call_site: CallSiteId, tsc: u64, data: ProbeData) -> ProbeData {
        match self {
            Trampoline::Record => {
                dispatch.record(call_site, tsc);
                data
            }
            Trampoline::RecordData => {
                dispatch.record_data(call_site, tsc, data);
                data
            }
            Trampoline::RecordIdentity => {
                let id = ProbeData::from(TxnId::mint(tsc));
                dispatch.record_data(call_site, tsc, id);
                id
            }
            Trampoline::Timestamp => {
                dispatch.record_trivial(call_site, tsc);
                data
            }
            Trampoline::TimestampData => {
                dispatch.record_data_trivial(call_site, tsc, data);
                data
            }
            Trampoline::TimestampIdentity => {
                let id = ProbeData::from(TxnId::mint(tsc));
                dispatch.record_data_trivial(call_site, tsc, id);
                id
            }
        }
    }
}

/// Control-plane view of what the recorders should capture.
pub struct RecorderCtl {
    dispatch: &'static Dispatch,
    generic_pmc_count: u8,
    fixed_pmc_set: FixedPmcSet,
}

impl Default for RecorderCtl {
    fn default() -> Self {
        Self::new(global())
    }
}

impl RecorderCtl {
    pub fn new(dispatch: &'static Dispatch) -> Self {
        Self {
            dispatch,
            generic_pmc_count: 0,
            fixed_pmc_set: FixedPmcSet::new(),
        }
    }

    pub fn dispatch(&self) -> &'static Dispatch {
        self.dispatch
    }

    pub fn generic_pmc_count(&self) -> u8 {
        self.generic_pmc_count
    }

    pub fn fixed_pmc_set(&self) -> FixedPmcSet {
        self.fixed_pmc_set
    }

    pub fn fixed_pmc_count(&self) -> u8 {
        self.fixed_pmc_set.size()
    }

    pub fn pmc_count(&self) -> u8 {
        self.generic_pmc_count + self.fixed_pmc_count()
    }

    /// Set the number of generic counters to read. Counts above the hardware
    /// capacity are rejected and the configuration is left unchanged.
    pub fn enable_generic_pmc(&mut self, count: u8) -> Result<()> {
        if count > MAX_GENERIC_PMC {
            return Err(Error::GenericPmcOverflow {
                count,
                max: MAX_GENERIC_PMC,
            });
        }
        self.generic_pmc_count = count;
        Ok(())
    }

    pub fn reset_generic_pmc(&mut self) {
        self.generic_pmc_count = 0;
    }

    /// Enable a fixed counter, failing exactly like [`FixedPmcSet::enable`].
    pub fn enable_fixed_pmc(&mut self, index: u8) -> Result<()> {
        self.fixed_pmc_set.enable(index)
    }

    pub fn reset_fixed_pmc(&mut self) {
        self.fixed_pmc_set.reset();
    }

    /// Plain-table slot for the current configuration: the number of
    /// counters read. Generic and fixed counters share a specialization; the
    /// [`CounterConfig`] published with the slot says which ones are read.
    pub fn active_recorder_index(&self) -> usize {
        self.pmc_count() as usize
    }

    /// Data-table slot for the current configuration. Same encoding as
    /// [`active_recorder_index`](Self::active_recorder_index).
    pub fn active_data_probe_recorder_index(&self) -> usize {
        self.pmc_count() as usize
    }

    pub fn can_activate_recorder(&self, index: usize) -> bool {
        index < RECORDER_CAPACITY && index < POPULATED_SLOTS
    }

    /// Publish a recorder.
    ///
    /// With `non_trivial` unset the timestamp-only routine is published. With
    /// it set, `index` must be the slot derived from the current configuration,
    /// otherwise the recorder would read a different number of counters than
    /// were configured and activation is refused.
    pub fn activate_recorder(&mut self, index: usize, non_trivial: bool) -> bool {
        if !self.can_activate_recorder(index) {
            warn!("cannot activate recorder {index} - capacity is {RECORDER_CAPACITY} slots");
            return false;
        }

        if !non_trivial {
            self.dispatch.publish(CounterConfig::TRIVIAL);
            debug!("activated timestamp-only recorder");
            return true;
        }

        let expected = self.active_recorder_index();
        if index != expected {
            warn!(
                "refusing to activate recorder {index} - configuration reads {expected} counters"
            );
            return false;
        }

        self.dispatch.publish(self.counter_config());
        debug!(
            "activated recorder {index} - {} generic pmc, {}",
            self.generic_pmc_count, self.fixed_pmc_set
        );
        true
    }

    /// Derive the slot from the current configuration and publish it.
    pub fn activate(&mut self) -> bool {
        let index = self.active_recorder_index();
        self.activate_recorder(index, index != TRIVIAL_SLOT)
    }

    /// Switch to a new counter configuration with a single publish. A thread
    /// already inside a recorder finishes with the configuration it loaded.
    ///
    /// Invalid input is rejected before anything is touched.
    pub fn reconfigure(&mut self, generic_pmc_count: u8, fixed: &[u8]) -> Result<usize> {
        if generic_pmc_count > MAX_GENERIC_PMC {
            return Err(Error::GenericPmcOverflow {
                count: generic_pmc_count,
                max: MAX_GENERIC_PMC,
            });
        }
        let mut fixed_pmc_set = FixedPmcSet::new();
        for index in fixed {
            fixed_pmc_set.enable(*index)?;
        }

        self.generic_pmc_count = generic_pmc_count;
        self.fixed_pmc_set = fixed_pmc_set;
        self.activate();
        Ok(self.active_recorder_index())
    }

    /// Timestamp-only trampoline when nothing is configured, else the active one.
    pub fn trampoline(&self, can_store_data: bool, can_suspend_txn: bool) -> Trampoline {
        self.trampoline_with(can_store_data, can_suspend_txn, self.pmc_count() > 0)
    }

    pub fn trampoline_with(
        &self,
        can_store_data: bool,
        can_suspend_txn: bool,
        non_trivial: bool,
    ) -> Trampoline {
        Trampoline::select(can_store_data, can_suspend_txn, non_trivial)
    }

    /// The word [`activate_recorder`](Self::activate_recorder) publishes.
    pub fn counter_config(&self) -> CounterConfig {
        CounterConfig::new(self.generic_pmc_count, self.fixed_pmc_set)
    }
}
