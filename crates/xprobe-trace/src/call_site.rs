//! Call sites - the static half of a probe.
//!
//! Every probe macro declares one `CallSite` in static storage and adds it to
//! [`CALL_SITES`] at link time, so the control plane can register every
//! macro-declared site before any of them fires. Sites declared by hand are
//! pushed onto a lock-free pending list with [`CallSite::announce`] instead.
//! Firing itself only reads the site's state word and calls through the
//! active recorder.

use crate::pmc::timestamp;
use crate::probe_data::ProbeData;
use crate::recorder::{self, Dispatch, Trampoline};
use crate::txn::TxnId;
use linkme::distributed_slice;
use std::fmt;
use std::ops::BitOr;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

/// Capability flags fixed when a call site is declared.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CallSiteAttrs(u8);

impl CallSiteAttrs {
    pub const NONE: Self = Self(0);
    pub const CAN_STORE_DATA: Self = Self(1 << 0);
    pub const CAN_BEGIN_TXN: Self = Self(1 << 1);
    pub const CAN_SUSPEND_TXN: Self = Self(1 << 2);
    pub const CAN_RESUME_TXN: Self = Self(1 << 3);
    pub const CAN_END_TXN: Self = Self(1 << 4);

    const NAMES: [(CallSiteAttrs, &'static str); 5] = [
        (Self::CAN_STORE_DATA, "CAN_STORE_DATA"),
        (Self::CAN_BEGIN_TXN, "CAN_BEGIN_TXN"),
        (Self::CAN_SUSPEND_TXN, "CAN_SUSPEND_TXN"),
        (Self::CAN_RESUME_TXN, "CAN_RESUME_TXN"),
        (Self::CAN_END_TXN, "CAN_END_TXN"),
    ];

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn can_store_data(self) -> bool {
        self.contains(Self::CAN_STORE_DATA)
    }

    pub const fn can_begin_txn(self) -> bool {
        self.contains(Self::CAN_BEGIN_TXN)
    }

    pub const fn can_suspend_txn(self) -> bool {
        self.contains(Self::CAN_SUSPEND_TXN)
    }

    pub const fn can_resume_txn(self) -> bool {
        self.contains(Self::CAN_RESUME_TXN)
    }

    pub const fn can_end_txn(self) -> bool {
        self.contains(Self::CAN_END_TXN)
    }
}

impl BitOr for CallSiteAttrs {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for CallSiteAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join(" | "))
        }
    }
}

/// Opaque token naming a call site. Compared, never dereferenced.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteId(usize);

impl CallSiteId {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallSiteId({:#x})", self.0)
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

const LINKED: u8 = 1 << 0;
const ENABLED: u8 = 1 << 1;

/// Every call site declared through the probe macros in the final binary.
#[distributed_slice]
pub static CALL_SITES: [&'static CallSite];

/// Head of the list of announced but not yet attached call sites.
static PENDING: AtomicPtr<CallSite> = AtomicPtr::new(ptr::null_mut());

/// A static instrumentation point.
pub struct CallSite {
    name: &'static str,
    file: &'static str,
    line: u32,
    attrs: CallSiteAttrs,
    state: AtomicU8,
    next_pending: AtomicPtr<CallSite>,
}

impl CallSite {
    /// Declare a call site. Sites start enabled.
    pub const fn new(
        name: &'static str,
        file: &'static str,
        line: u32,
        attrs: CallSiteAttrs,
    ) -> Self {
        Self {
            name,
            file,
            line,
            attrs,
            state: AtomicU8::new(ENABLED),
            next_pending: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn id(&self) -> CallSiteId {
        CallSiteId(self as *const CallSite as usize)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn attrs(&self) -> CallSiteAttrs {
        self.attrs
    }

    pub fn is_enabled(&self) -> bool {
        self.state.load(Ordering::Relaxed) & ENABLED != 0
    }

    pub fn enable(&self) {
        self.state.fetch_or(ENABLED, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.state.fetch_and(!ENABLED, Ordering::Relaxed);
    }

    pub fn is_announced(&self) -> bool {
        self.state.load(Ordering::Relaxed) & LINKED != 0
    }

    /// Mark the site as attached. Returns true if it was not linked before.
    pub fn mark_linked(&self) -> bool {
        self.state.fetch_or(LINKED, Ordering::AcqRel) & LINKED == 0
    }

    /// Push this site onto the pending list unless it is already there or
    /// was attached before. Returns true if this call pushed it.
    pub fn announce(&'static self) -> bool {
        if !self.mark_linked() {
            return false;
        }
        let this = self as *const CallSite as *mut CallSite;
        let mut head = PENDING.load(Ordering::Relaxed);
        loop {
            self.next_pending.store(head, Ordering::Relaxed);
            match PENDING.compare_exchange_weak(head, this, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(current) => head = current,
            }
        }
    }

    #[inline(always)]
    fn armed(&self) -> bool {
        self.state.load(Ordering::Relaxed) & ENABLED != 0
    }

    /// Trampoline this site's capabilities compile to.
    pub const fn trampoline(&self) -> Trampoline {
        Trampoline::for_attrs(self.attrs)
    }

    /// Fire through the process-wide recorder.
    #[inline(always)]
    pub fn fire(&'static self) {
        self.fire_in(recorder::global());
    }

    #[inline(always)]
    pub fn fire_in(&'static self, dispatch: &Dispatch) {
        if self.armed() {
            self.trampoline()
                .enter(dispatch, self.id(), timestamp(), ProbeData::default());
        }
    }

    /// Fire with a 128-bit payload through the process-wide recorder.
    #[inline(always)]
    pub fn fire_data(&'static self, data: impl Into<ProbeData>) {
        self.fire_data_in(recorder::global(), data.into());
    }

    #[inline(always)]
    pub fn fire_data_in(&'static self, dispatch: &Dispatch, data: ProbeData) {
        if self.armed() {
            self.trampoline()
                .enter(dispatch, self.id(), timestamp(), data);
        }
    }

    /// Fire a suspend site, returning the transaction id to hand to the
    /// resuming thread. An id is minted even while the site is disabled.
    #[inline(always)]
    pub fn fire_identity(&'static self) -> TxnId {
        self.fire_identity_in(recorder::global())
    }

    #[inline(always)]
    pub fn fire_identity_in(&'static self, dispatch: &Dispatch) -> TxnId {
        let tsc = timestamp();
        if self.armed() {
            let data = self
                .trampoline()
                .enter(dispatch, self.id(), tsc, ProbeData::default());
            TxnId::from(data)
        } else {
            TxnId::mint(tsc)
        }
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("id", &self.id())
            .field("name", &self.name)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("attrs", &self.attrs)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Call sites collected from the probe macros at link time.
pub fn static_call_sites() -> &'static [&'static CallSite] {
    CALL_SITES.static_slice()
}

/// Detach every announced call site from the pending list, newest first.
pub fn take_pending() -> Vec<&'static CallSite> {
    let mut sites = Vec::new();
    let mut cursor = PENDING.swap(ptr::null_mut(), Ordering::Acquire);
    while !cursor.is_null() {
        // SAFETY: only `&'static CallSite`s are ever pushed onto PENDING.
        let site: &'static CallSite = unsafe { &*cursor };
        cursor = site.next_pending.load(Ordering::Relaxed);
        sites.push(site);
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    static ANNOUNCED: CallSite = CallSite::new("Announced", file!(), line!(), CallSiteAttrs::NONE);

    #[test]
    fn test_attrs_debug_and_queries() {
        let attrs = CallSiteAttrs::CAN_RESUME_TXN | CallSiteAttrs::CAN_STORE_DATA;
        assert!(attrs.can_resume_txn());
        assert!(attrs.can_store_data());
        assert!(!attrs.can_begin_txn());
        assert_eq!(format!("{attrs:?}"), "CAN_STORE_DATA | CAN_RESUME_TXN");
        assert_eq!(format!("{:?}", CallSiteAttrs::NONE), "NONE");
    }

    #[test]
    #[serial(pending)]
    fn test_announce_only_once() {
        assert!(ANNOUNCED.announce());
        assert!(!ANNOUNCED.announce());
        assert!(ANNOUNCED.is_announced());
        // other tests may announce their own sites concurrently
        let pending = take_pending();
        assert!(pending.iter().any(|site| site.id() == ANNOUNCED.id()));
    }

    #[test]
    fn test_macro_sites_collected_before_firing() {
        fn never_called() {
            crate::probe!(NeverFired);
        }
        let _ = never_called;

        let site = static_call_sites()
            .iter()
            .find(|site| site.name() == "NeverFired")
            .expect("macro site collected at link time");
        assert!(site.is_enabled());
        assert!(!site.is_announced());
    }

    #[test]
    fn test_firing_does_not_announce() {
        static QUIET: CallSite = CallSite::new("Quiet", file!(), line!(), CallSiteAttrs::NONE);
        crate::sample::attach_thread();
        QUIET.fire_in(recorder::global());
        assert!(!QUIET.is_announced());
        let _ = crate::sample::drain();
    }

    #[test]
    fn test_enable_toggle() {
        static SITE: CallSite = CallSite::new("Toggle", file!(), line!(), CallSiteAttrs::NONE);
        assert!(SITE.is_enabled());
        SITE.disable();
        assert!(!SITE.is_enabled());
        SITE.enable();
        assert!(SITE.is_enabled());
    }
}
