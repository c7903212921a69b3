//! Scope guards pairing a begin probe with an end probe.

use crate::call_site::CallSite;
use crate::probe_data::ProbeData;
use std::cell::Cell;

/// Fires `begin` when created and `end` when dropped.
///
/// Also used for transaction scopes, where the two sites carry the begin and
/// end capabilities.
#[must_use = "the end probe fires when the guard is dropped"]
pub struct ProbeScope {
    end: &'static CallSite,
}

impl ProbeScope {
    #[inline(always)]
    pub fn enter(begin: &'static CallSite, end: &'static CallSite) -> Self {
        begin.fire();
        Self { end }
    }
}

impl Drop for ProbeScope {
    #[inline(always)]
    fn drop(&mut self) {
        self.end.fire();
    }
}

/// Payload of a data scope.
///
/// A borrowed payload is read again when the scope ends, so writes made
/// between the begin and end probes show up in the end sample.
pub enum Payload<'a> {
    Borrowed(&'a Cell<ProbeData>),
    Owned(ProbeData),
}

impl Payload<'_> {
    pub fn get(&self) -> ProbeData {
        match self {
            Payload::Borrowed(cell) => cell.get(),
            Payload::Owned(data) => *data,
        }
    }
}

impl<'a> From<&'a Cell<ProbeData>> for Payload<'a> {
    fn from(cell: &'a Cell<ProbeData>) -> Self {
        Payload::Borrowed(cell)
    }
}

impl From<ProbeData> for Payload<'_> {
    fn from(data: ProbeData) -> Self {
        Payload::Owned(data)
    }
}

/// Data-carrying variant of [`ProbeScope`].
#[must_use = "the end probe fires when the guard is dropped"]
pub struct DataProbeScope<'a> {
    end: &'static CallSite,
    payload: Payload<'a>,
}

impl<'a> DataProbeScope<'a> {
    #[inline(always)]
    pub fn enter(begin: &'static CallSite, end: &'static CallSite, payload: impl Into<Payload<'a>>) -> Self {
        let payload = payload.into();
        begin.fire_data(payload.get());
        Self { end, payload }
    }
}

impl Drop for DataProbeScope<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.end.fire_data(self.payload.get());
    }
}
