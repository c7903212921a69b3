//! Fixed-function PMU counter set.
//!
//! Tracks which of the three architectural fixed counters are in use:
//!   1. Instructions retired
//!   2. Core cycles while not halted
//!   3. Reference cycles while not halted

use crate::error::{Error, Result};
use std::fmt;

/// Architectural fixed-function counters, in hardware index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FixedCounter {
    InstRetiredAny = 0,
    CpuClkUnhaltedCore = 1,
    CpuClkUnhaltedRef = 2,
}

impl FixedCounter {
    pub const COUNT: u8 = 3;

    pub const ALL: [FixedCounter; Self::COUNT as usize] = [
        FixedCounter::InstRetiredAny,
        FixedCounter::CpuClkUnhaltedCore,
        FixedCounter::CpuClkUnhaltedRef,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FixedCounter::InstRetiredAny => "INST_RETIRED_ANY",
            FixedCounter::CpuClkUnhaltedCore => "CPU_CLK_UNHALTED_CORE",
            FixedCounter::CpuClkUnhaltedRef => "CPU_CLK_UNHALTED_REF",
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Value loaded into ECX for `rdpmc` to read this fixed counter.
    pub fn rdpmc_selector(self) -> u32 {
        (1 << 30) | self as u32
    }
}

impl TryFrom<u8> for FixedCounter {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        FixedCounter::ALL
            .get(index as usize)
            .copied()
            .ok_or(Error::InvalidFixedPmc {
                index,
                max: FixedCounter::COUNT,
            })
    }
}

/// Bitset over the fixed counters. Only bits 0..=2 are ever set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FixedPmcSet {
    counter_set: u8,
}

impl FixedPmcSet {
    pub const fn new() -> Self {
        Self { counter_set: 0 }
    }

    /// Enable a counter whose index is known at compile time.
    ///
    /// Out of range indices are rejected during compilation.
    pub fn enable_counter<const INDEX: u8>(&mut self) {
        const { assert!(INDEX < FixedCounter::COUNT, "invalid fixed pmu counter index") };
        self.counter_set |= 1 << INDEX;
    }

    /// Enable a counter by runtime index, leaving the set untouched on error.
    pub fn enable(&mut self, index: u8) -> Result<()> {
        let counter = FixedCounter::try_from(index)?;
        self.insert(counter);
        Ok(())
    }

    pub fn insert(&mut self, counter: FixedCounter) {
        self.counter_set |= 1 << counter.index();
    }

    pub fn disable_counter<const INDEX: u8>(&mut self) {
        const { assert!(INDEX < FixedCounter::COUNT, "invalid fixed pmu counter index") };
        self.counter_set &= !(1 << INDEX);
    }

    pub fn remove(&mut self, counter: FixedCounter) {
        self.counter_set &= !(1 << counter.index());
    }

    pub fn is_enabled(&self, counter: FixedCounter) -> bool {
        self.counter_set & (1 << counter.index()) != 0
    }

    pub fn reset(&mut self) {
        self.counter_set = 0;
    }

    /// Number of enabled counters (0..=3).
    pub fn size(&self) -> u8 {
        self.counter_set.count_ones() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.counter_set == 0
    }

    /// Enabled counters in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = FixedCounter> + '_ {
        FixedCounter::ALL
            .into_iter()
            .filter(|counter| self.is_enabled(*counter))
    }

    pub fn bits(&self) -> u8 {
        self.counter_set
    }

    /// Set from a mask previously returned by [`bits`](Self::bits). Bits
    /// beyond the fixed counters are ignored.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            counter_set: bits & ((1 << FixedCounter::COUNT) - 1),
        }
    }
}

impl fmt::Display for FixedPmcSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Enabled fixed PMU Counters - | ")?;
        if self.is_empty() {
            return f.write_str("NONE |");
        }
        for counter in self.iter() {
            write!(f, "{} | ", counter.name())?;
        }
        Ok(())
    }
}
