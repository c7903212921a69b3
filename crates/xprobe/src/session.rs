//! Control-plane session: the probe catalog, the counter configuration and
//! the settings they were created with.

use crate::error::{Error, Result};
use crate::paths;
use log::{debug, info, warn};
use std::path::PathBuf;
use xprobe_trace::recorder::TRIVIAL_SLOT;
use xprobe_trace::{
    CallSite, CallSiteAttrs, CallSiteId, Dispatch, ProbeDescriptor, ProbeHandle, ProbeRegistry,
    RecorderCtl, Sample, Stitched, Stitcher, sample, static_call_sites, take_pending,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub verbose: bool,
    pub samples_prefix: String,
    pub suffix_pid: bool,
    pub suffix_tid: bool,
    /// Per-thread sample buffer capacity for threads that have not recorded yet.
    pub sample_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            samples_prefix: "xprobe".to_string(),
            suffix_pid: true,
            suffix_tid: false,
            sample_capacity: sample::DEFAULT_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn samples_path(&self) -> PathBuf {
        paths::samples_file_path(&self.samples_prefix, self.suffix_pid, self.suffix_tid)
    }
}

pub struct Session {
    config: SessionConfig,
    registry: ProbeRegistry,
    recorder: RecorderCtl,
}

impl Session {
    /// Session over the process-wide dispatch the probe macros record through.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_dispatch(config, xprobe_trace::recorder::global())
    }

    /// Every call site declared through the probe macros is registered here,
    /// before any of them fires.
    pub fn with_dispatch(config: SessionConfig, dispatch: &'static Dispatch) -> Self {
        sample::set_capacity(config.sample_capacity);
        let mut session = Self {
            config,
            registry: ProbeRegistry::new(),
            recorder: RecorderCtl::new(dispatch),
        };
        for &site in static_call_sites() {
            session.attach(site);
        }
        info!("attached {} static probes", session.registry.len());
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    pub fn recorder(&self) -> &RecorderCtl {
        &self.recorder
    }

    /// Register one call site unless it is already known.
    pub fn attach(&mut self, site: &'static CallSite) -> ProbeHandle {
        if let Some(handle) = self.registry.lookup(site.id()) {
            return handle;
        }
        site.mark_linked();
        let handle = self.registry.register(ProbeDescriptor::from_site(site));
        debug!(
            "attached probe {} at {}:{} [{:?}]",
            site.name(),
            site.file(),
            site.line(),
            site.attrs()
        );
        handle
    }

    /// Register every hand-declared call site announced since the last call.
    pub fn attach_pending(&mut self) -> usize {
        let sites = take_pending();
        let count = sites.len();
        // oldest first, so the newest announcement ends up at the head
        for site in sites.into_iter().rev() {
            self.attach(site);
        }
        if count > 0 {
            info!("attached {count} probes, {} total", self.registry.len());
        }
        count
    }

    /// Snapshot of every registered probe, newest first.
    pub fn probes(&self) -> Vec<ProbeDescriptor> {
        self.registry.iter().map(|(_, probe)| probe.clone()).collect()
    }

    pub fn attrs_of(&self, call_site: CallSiteId) -> Option<CallSiteAttrs> {
        let handle = self.registry.lookup(call_site)?;
        self.registry.get(handle).map(|probe| probe.attrs())
    }

    pub fn name_of(&self, call_site: CallSiteId) -> Option<&'static str> {
        let handle = self.registry.lookup(call_site)?;
        self.registry.get(handle).map(|probe| probe.name())
    }

    pub fn enable_probe(&mut self, name: &str) -> Result<()> {
        let handle = self.find(name)?;
        self.registry.enable(handle)?;
        debug!("enabled probe {name}");
        Ok(())
    }

    pub fn disable_probe(&mut self, name: &str) -> Result<()> {
        let handle = self.find(name)?;
        self.registry.disable(handle)?;
        debug!("disabled probe {name}");
        Ok(())
    }

    /// Drop a probe from the catalog. Its call site keeps its enabled state.
    pub fn remove_probe(&mut self, call_site: CallSiteId) -> Result<ProbeDescriptor> {
        let handle = self
            .registry
            .lookup(call_site)
            .ok_or_else(|| Error::ProbeNotFound(call_site.to_string()))?;
        Ok(self.registry.unregister(handle)?)
    }

    fn find(&self, name: &str) -> Result<ProbeHandle> {
        self.registry
            .find_by_name(name)
            .ok_or_else(|| Error::ProbeNotFound(name.to_string()))
    }

    /// Read `generic` programmable counters plus the listed fixed counters
    /// from now on. Returns the recorder slot that was published.
    pub fn configure_counters(&mut self, generic: u8, fixed: &[u8]) -> Result<usize> {
        let slot = self.recorder.reconfigure(generic, fixed)?;
        info!(
            "recorder slot {slot} active - {generic} generic pmc, {}",
            self.recorder.fixed_pmc_set()
        );
        Ok(slot)
    }

    /// Back to timestamp-only recording.
    pub fn reset_counters(&mut self) {
        if !self.recorder.activate_recorder(TRIVIAL_SLOT, false) {
            warn!("failed to activate timestamp-only recorder");
        }
        self.recorder.reset_generic_pmc();
        self.recorder.reset_fixed_pmc();
    }

    /// Rebuild transactions from per-thread sample streams.
    pub fn stitch(&self, streams: &[(u64, Vec<Sample>)]) -> Stitched {
        let mut stitcher = Stitcher::new(|call_site| self.attrs_of(call_site));
        for (thread, samples) in streams {
            stitcher.feed(*thread, samples);
        }
        let stitched = stitcher.finish();
        for violation in &stitched.violations {
            warn!("{violation}");
        }
        stitched
    }
}
