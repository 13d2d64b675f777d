//! GAM arena: every instantiated GAM, addressed by a stable [`GamHandle`].
//!
//! States, threads, groups and executables refer to GAMs by handle only.
//! The GAM and its private memory form a [`GamUnit`] that a thread checks
//! out for as long as it executes the GAM and checks back in when it ends.
//! The slot mutex guards the hand-over only; no cycle ever takes it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::broker::Broker;
use crate::gam::{Gam, GamHooks, GamMemory, GamStatus};

/// Stable index of a GAM in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GamHandle(pub(crate) usize);

impl GamHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Brokers of one GAM towards one data source.
#[derive(Debug, Clone)]
pub struct BrokerLink {
    pub data_source: Arc<str>,
    pub inputs: Vec<Broker>,
    pub outputs: Vec<Broker>,
}

/// The GAM and its private memory, owned by whichever thread executes it.
pub struct GamUnit {
    pub(crate) gam: Box<dyn Gam>,
    pub(crate) memory: GamMemory,
    /// Generation whose context is installed; 0 before the first.
    pub(crate) activation: u64,
}

impl GamUnit {
    pub fn memory(&self) -> &GamMemory {
        &self.memory
    }
}

/// One arena entry.
pub struct GamSlot {
    name: Arc<str>,
    class: String,
    group: Option<usize>,
    links: Vec<BrokerLink>,
    status: GamStatus,
    hooks: Option<Arc<dyn GamHooks>>,
    unit: Mutex<Option<GamUnit>>,
}

impl GamSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Index of the group this GAM belongs to.
    pub fn group(&self) -> Option<usize> {
        self.group
    }

    /// Broker links, one per data source, inputs first by first appearance.
    pub fn links(&self) -> &[BrokerLink] {
        &self.links
    }

    pub fn status(&self) -> GamStatus {
        self.status
    }

    pub fn hooks(&self) -> Option<&Arc<dyn GamHooks>> {
        self.hooks.as_ref()
    }

    /// `false` while a thread holds the unit.
    pub fn is_available(&self) -> bool {
        self.unit.lock().is_some()
    }

    /// Run `f` on the unit if no thread holds it.
    pub fn with_unit<R>(&self, f: impl FnOnce(&GamUnit) -> R) -> Option<R> {
        self.unit.lock().as_ref().map(f)
    }

    fn take_unit(&self) -> Option<GamUnit> {
        self.unit.lock().take()
    }

    fn put_unit(&self, unit: GamUnit) {
        *self.unit.lock() = Some(unit);
    }
}

/// All GAMs of an application.
#[derive(Default)]
pub struct GamArena {
    slots: Vec<GamSlot>,
    by_name: HashMap<String, GamHandle>,
}

impl GamArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a GAM. Returns `None` if the name is taken.
    pub fn insert(&mut self, name: &str, class: &str, gam: Box<dyn Gam>, memory: GamMemory) -> Option<GamHandle> {
        if self.by_name.contains_key(name) {
            return None;
        }
        let handle = GamHandle(self.slots.len());
        self.slots.push(GamSlot {
            name: Arc::from(name),
            class: class.to_string(),
            group: None,
            links: Vec::new(),
            status: GamStatus::Unconfigured,
            hooks: None,
            unit: Mutex::new(Some(GamUnit {
                gam,
                memory,
                activation: 0,
            })),
        });
        self.by_name.insert(name.to_string(), handle);
        Some(handle)
    }

    pub fn handle(&self, name: &str) -> Option<GamHandle> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, handle: GamHandle) -> Option<&GamSlot> {
        self.slots.get(handle.0)
    }

    pub(crate) fn get_mut(&mut self, handle: GamHandle) -> Option<&mut GamSlot> {
        self.slots.get_mut(handle.0)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GamHandle, &GamSlot)> {
        self.slots.iter().enumerate().map(|(i, s)| (GamHandle(i), s))
    }

    /// Take the units of `handles`, in order. On failure nothing stays
    /// checked out and the first unavailable handle is returned.
    pub(crate) fn checkout(&self, handles: &[GamHandle]) -> Result<Vec<GamUnit>, GamHandle> {
        let mut units = Vec::with_capacity(handles.len());
        for &h in handles {
            match self.get(h).and_then(GamSlot::take_unit) {
                Some(unit) => units.push(unit),
                None => {
                    self.checkin(handles, units);
                    return Err(h);
                }
            }
        }
        Ok(units)
    }

    /// Return units taken by [`checkout`](Self::checkout) with the same
    /// handles.
    pub(crate) fn checkin(&self, handles: &[GamHandle], units: Vec<GamUnit>) {
        for (&h, unit) in handles.iter().zip(units) {
            if let Some(slot) = self.get(h) {
                slot.put_unit(unit);
            }
        }
    }
}

impl GamSlot {
    pub(crate) fn set_links(&mut self, links: Vec<BrokerLink>) {
        self.links = links;
    }

    pub(crate) fn set_group(&mut self, group: usize) {
        self.group = Some(group);
    }

    pub(crate) fn set_status(&mut self, status: GamStatus) {
        self.status = status;
    }

    pub(crate) fn set_hooks(&mut self, hooks: Option<Arc<dyn GamHooks>>) {
        self.hooks = hooks;
    }
}
