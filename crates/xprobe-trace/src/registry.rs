//! Probe registry - the control plane's catalog of probes.
//!
//! Probes live in an arena and are chained newest-first through explicit
//! prev/next slot indices, so insertion and removal are O(1) given a handle.
//! Handles carry a generation and go stale once their slot is reused.
//! Identities come from a counter that only ever grows.
//!
//! The registry is never touched by firing probes. It expects one writer.

use crate::call_site::{CallSite, CallSiteAttrs, CallSiteId};
use crate::error::{Error, Result};
use log::error;

/// Stable reference to a registered probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeHandle {
    index: u32,
    generation: u32,
}

impl ProbeHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// One instrumentation point as seen by the control plane.
#[derive(Debug, Clone)]
pub struct ProbeDescriptor {
    id: u64,
    call_site: CallSiteId,
    name: &'static str,
    file: &'static str,
    line: u32,
    attrs: CallSiteAttrs,
    site: Option<&'static CallSite>,
    enabled: bool,
}

impl ProbeDescriptor {
    /// Describe a probe declared by one of the probe macros.
    pub fn from_site(site: &'static CallSite) -> Self {
        Self {
            id: 0,
            call_site: site.id(),
            name: site.name(),
            file: site.file(),
            line: site.line(),
            attrs: site.attrs(),
            site: Some(site),
            enabled: site.is_enabled(),
        }
    }

    /// Describe a probe that has no static call site behind it.
    pub fn new(call_site: CallSiteId, name: &'static str, attrs: CallSiteAttrs) -> Self {
        Self {
            id: 0,
            call_site,
            name,
            file: "",
            line: 0,
            attrs,
            site: None,
            enabled: true,
        }
    }

    /// Identity assigned at registration.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn call_site(&self) -> CallSiteId {
        self.call_site
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
        match self.site {
            Some(site) => site.is_enabled(),
            None => self.enabled,
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if let Some(site) = self.site {
            if enabled {
                site.enable();
            } else {
                site.disable();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Links {
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug)]
struct Entry {
    probe: ProbeDescriptor,
    links: Links,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
pub struct ProbeRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    len: usize,
    /// 64 bits: never wraps within a process lifetime.
    next_id: u64,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<ProbeHandle> {
        self.head.map(|index| self.handle_at(index))
    }

    /// Insert at the head and assign the next identity.
    pub fn register(&mut self, mut probe: ProbeDescriptor) -> ProbeHandle {
        probe.id = self.next_id;
        self.next_id += 1;

        let entry = Entry {
            probe,
            links: Links {
                prev: None,
                next: self.head,
            },
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };

        if let Some(old_head) = self.head
            && let Some(head) = self.entry_mut(old_head)
        {
            head.links.prev = Some(index);
        }
        self.head = Some(index);
        self.len += 1;
        self.handle_at(index)
    }

    /// Unlink and return a probe.
    ///
    /// The probe's own links are checked against its neighbours first. If they
    /// disagree the registry is left exactly as it was and `StructuralCorruption`
    /// is returned; other probes stay usable.
    pub fn unregister(&mut self, handle: ProbeHandle) -> Result<ProbeDescriptor> {
        let index = self.resolve(handle)?;
        self.validate(index)?;

        let Some(entry) = self.slots[index as usize].entry.take() else {
            return Err(self.stale(handle));
        };
        let Links { prev, next } = entry.links;

        if let Some(next) = next
            && let Some(neighbour) = self.entry_mut(next)
        {
            neighbour.links.prev = prev;
        }
        if let Some(prev) = prev
            && let Some(neighbour) = self.entry_mut(prev)
        {
            neighbour.links.next = next;
        }
        if self.head == Some(index) {
            self.head = next.or(prev);
        }

        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Ok(entry.probe)
    }

    /// First probe whose call site matches, scanning from the head.
    pub fn lookup(&self, call_site: CallSiteId) -> Option<ProbeHandle> {
        self.iter()
            .find(|(_, probe)| probe.call_site == call_site)
            .map(|(handle, _)| handle)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ProbeHandle> {
        self.iter()
            .find(|(_, probe)| probe.name == name)
            .map(|(handle, _)| handle)
    }

    pub fn get(&self, handle: ProbeHandle) -> Option<&ProbeDescriptor> {
        let index = self.resolve(handle).ok()?;
        self.entry(index).map(|entry| &entry.probe)
    }

    pub fn enable(&mut self, handle: ProbeHandle) -> Result<()> {
        self.set_enabled(handle, true)
    }

    pub fn disable(&mut self, handle: ProbeHandle) -> Result<()> {
        self.set_enabled(handle, false)
    }

    fn set_enabled(&mut self, handle: ProbeHandle, enabled: bool) -> Result<()> {
        let index = self.resolve(handle)?;
        match self.entry_mut(index) {
            Some(entry) => {
                entry.probe.set_enabled(enabled);
                Ok(())
            }
            None => Err(self.stale(handle)),
        }
    }

    /// Live probes from the head, newest first.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            cursor: self.head,
            remaining: self.slots.len(),
        }
    }

    /// Check every link in the registry and the recorded size.
    pub fn verify(&self) -> Result<()> {
        let mut forward = 0usize;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let Some(entry) = self.entry(index) else {
                return Err(corruption(index, "link points at an empty slot"));
            };
            if entry.links.prev != prev {
                return Err(corruption(index, "prev link disagrees with traversal"));
            }
            forward += 1;
            if forward > self.slots.len() {
                return Err(corruption(index, "cycle in next links"));
            }
            prev = Some(index);
            cursor = entry.links.next;
        }

        if forward != self.len {
            return Err(corruption(
                self.head.unwrap_or(0),
                format!("size {} but {} probes reachable", self.len, forward),
            ));
        }
        Ok(())
    }

    fn validate(&self, index: u32) -> Result<()> {
        let Some(entry) = self.entry(index) else {
            return Err(corruption(index, "slot is empty"));
        };

        if let Some(next) = entry.links.next {
            let chained = self.entry(next).and_then(|n| n.links.prev) == Some(index);
            if !chained {
                error!("detected probe list corruption - probe {index} not chained to next probe {next}");
                return Err(corruption(index, format!("not chained to next probe {next}")));
            }
        }

        if let Some(prev) = entry.links.prev {
            let chained = self.entry(prev).and_then(|p| p.links.next) == Some(index);
            if !chained {
                error!("detected probe list corruption - probe {index} not chained to prev probe {prev}");
                return Err(corruption(index, format!("not chained to prev probe {prev}")));
            }
        } else if self.head != Some(index) {
            error!("detected probe list corruption - probe {index} has no prev but is not the head");
            return Err(corruption(index, "no prev link but not the head"));
        }

        Ok(())
    }

    fn resolve(&self, handle: ProbeHandle) -> Result<u32> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.entry.is_some() => {
                Ok(handle.index)
            }
            _ => Err(self.stale(handle)),
        }
    }

    fn stale(&self, handle: ProbeHandle) -> Error {
        Error::StaleHandle {
            slot: handle.index,
            generation: handle.generation,
        }
    }

    fn handle_at(&self, index: u32) -> ProbeHandle {
        ProbeHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn entry(&self, index: u32) -> Option<&Entry> {
        self.slots.get(index as usize)?.entry.as_ref()
    }

    fn entry_mut(&mut self, index: u32) -> Option<&mut Entry> {
        self.slots.get_mut(index as usize)?.entry.as_mut()
    }
}

fn corruption(slot: u32, reason: impl Into<String>) -> Error {
    Error::StructuralCorruption {
        slot,
        reason: reason.into(),
    }
}

/// Forward, single-pass walk over the live probes.
pub struct Iter<'a> {
    registry: &'a ProbeRegistry,
    cursor: Option<u32>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (ProbeHandle, &'a ProbeDescriptor);

    fn next(&mut self) -> Option<Self::Item> {
        // bounded so a corrupted cycle cannot spin forever
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let index = self.cursor?;
        let entry = self.registry.entry(index)?;
        self.cursor = entry.links.next;
        Some((self.registry.handle_at(index), &entry.probe))
    }
}

impl<'a> IntoIterator for &'a ProbeRegistry {
    type Item = (ProbeHandle, &'a ProbeDescriptor);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
