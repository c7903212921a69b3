//! In-process probes with hardware counter capture.
//!
//! This crate is the recording half of xprobe:
//! - **Probes**: static call sites declared with the macros below, each one
//!   recording a timestamp and the configured performance counters
//! - **Recorders**: a fixed table of counter-count specializations, switched
//!   at runtime by publishing a single slot index
//! - **Transactions**: begin/suspend/resume/end probes that let one logical
//!   operation be followed across threads
//!
//! # Usage
//!
//! ```rust,ignore
//! fn handle(request: &Request) {
//!     xprobe_trace::probe_scope!(Handle);
//!     xprobe_trace::data_probe!(RequestSize, request.len() as u64);
//! }
//! ```
//!
//! Every macro-declared call site is listed in [`CALL_SITES`] at link time,
//! before it ever fires.
//!
//! Samples land in a per-thread buffer; [`sample::drain`] hands them to the
//! control plane. Counters are selected through [`RecorderCtl`]:
//!
//! ```rust,ignore
//! let mut ctl = xprobe_trace::RecorderCtl::default();
//! ctl.reconfigure(2, &[0])?; // two generic counters and INST_RETIRED.ANY
//! ```

mod call_site;
mod error;
mod fixed_pmc;
mod pmc;
mod probe_data;
pub mod recorder;
pub mod registry;
pub mod sample;
mod scope;
pub mod txn;

pub use call_site::{
    CALL_SITES, CallSite, CallSiteAttrs, CallSiteId, static_call_sites, take_pending,
};
pub use error::{Error, Result};
pub use fixed_pmc::{FixedCounter, FixedPmcSet};
pub use pmc::{CounterSource, MAX_GENERIC_PMC, MAX_PMC, Rdpmc, timestamp};
pub use probe_data::ProbeData;
pub use recorder::{CounterConfig, Dispatch, RECORDER_CAPACITY, RecorderCtl, Trampoline};
pub use registry::{ProbeDescriptor, ProbeHandle, ProbeRegistry};
pub use sample::Sample;
pub use scope::{DataProbeScope, Payload, ProbeScope};
pub use txn::{Stitched, Stitcher, Transaction, TxnId, TxnState};

#[doc(hidden)]
pub mod __private {
    pub use linkme;
}

/// Declare a call site in static storage, list it in [`CALL_SITES`] and
/// evaluate to `&'static CallSite`.
#[doc(hidden)]
#[macro_export]
macro_rules! __call_site {
    ($name:expr, $attrs:expr) => {{
        static SITE: $crate::CallSite = $crate::CallSite::new($name, file!(), line!(), $attrs);
        #[$crate::__private::linkme::distributed_slice($crate::CALL_SITES)]
        #[linkme(crate = $crate::__private::linkme)]
        static LISTED: &'static $crate::CallSite = &SITE;
        &SITE
    }};
}

/// Record a sample at this point.
///
/// ```rust,ignore
/// xprobe_trace::probe!(CacheMiss);
/// ```
#[macro_export]
macro_rules! probe {
    ($name:ident) => {
        $crate::__call_site!(stringify!($name), $crate::CallSiteAttrs::NONE).fire()
    };
}

/// Record a sample carrying up to 128 bits of data.
#[macro_export]
macro_rules! data_probe {
    ($name:ident, $data:expr) => {
        $crate::__call_site!(stringify!($name), $crate::CallSiteAttrs::CAN_STORE_DATA)
            .fire_data($data)
    };
}

/// Record `<Name>Begin` now and `<Name>End` when the enclosing block exits.
#[macro_export]
macro_rules! probe_scope {
    ($name:ident) => {
        let _xprobe_scope = $crate::ProbeScope::enter(
            $crate::__call_site!(
                concat!(stringify!($name), "Begin"),
                $crate::CallSiteAttrs::NONE
            ),
            $crate::__call_site!(
                concat!(stringify!($name), "End"),
                $crate::CallSiteAttrs::NONE
            ),
        );
    };
}

/// Data-carrying [`probe_scope!`]. A `&Cell<ProbeData>` payload is read
/// again at scope exit.
#[macro_export]
macro_rules! data_probe_scope {
    ($name:ident, $payload:expr) => {
        let _xprobe_scope = $crate::DataProbeScope::enter(
            $crate::__call_site!(
                concat!(stringify!($name), "Begin"),
                $crate::CallSiteAttrs::CAN_STORE_DATA
            ),
            $crate::__call_site!(
                concat!(stringify!($name), "End"),
                $crate::CallSiteAttrs::CAN_STORE_DATA
            ),
            $payload,
        );
    };
}

/// Start a transaction on the calling thread.
#[macro_export]
macro_rules! txn_begin {
    ($name:ident) => {
        $crate::__call_site!(stringify!($name), $crate::CallSiteAttrs::CAN_BEGIN_TXN).fire()
    };
}

/// Suspend the current transaction. Evaluates to the [`TxnId`] the resuming
/// thread must pass to [`txn_resume!`].
#[macro_export]
macro_rules! txn_suspend {
    ($name:ident) => {
        $crate::__call_site!(stringify!($name), $crate::CallSiteAttrs::CAN_SUSPEND_TXN)
            .fire_identity()
    };
}

/// Resume a suspended transaction, possibly on another thread.
#[macro_export]
macro_rules! txn_resume {
    ($name:ident, $id:expr) => {
        $crate::__call_site!(
            stringify!($name),
            $crate::CallSiteAttrs::CAN_RESUME_TXN.union($crate::CallSiteAttrs::CAN_STORE_DATA)
        )
        .fire_data($crate::TxnId::from($id))
    };
}

/// End the current transaction.
#[macro_export]
macro_rules! txn_end {
    ($name:ident) => {
        $crate::__call_site!(stringify!($name), $crate::CallSiteAttrs::CAN_END_TXN).fire()
    };
}

/// Begin a transaction now and end it when the enclosing block exits.
#[macro_export]
macro_rules! txn_scope {
    ($name:ident) => {
        let _xprobe_txn = $crate::ProbeScope::enter(
            $crate::__call_site!(
                concat!(stringify!($name), "Begin"),
                $crate::CallSiteAttrs::CAN_BEGIN_TXN
            ),
            $crate::__call_site!(
                concat!(stringify!($name), "End"),
                $crate::CallSiteAttrs::CAN_END_TXN
            ),
        );
    };
}
