//! Configuration pipeline: data sources → GAMs → signal resolution →
//! allocation → GAM setup → brokers → groups → states → scheduler.
//!
//! Every step either succeeds completely or returns the first
//! [`ConfigurationError`]; nothing built so far escapes on failure.

use std::collections::HashMap;
use std::sync::Arc;

use cadence_common::types::{TypeError, TypeRegistry};
use tracing::{debug, info, warn};

use crate::arena::{BrokerLink, GamArena, GamHandle};
use crate::broker::{BufferIndex, SignalBinding, build_brokers};
use crate::config::{ApplicationConfig, DeclaredSignal, FunctionConfig, SignalConfig};
use crate::datasource::DataSource;
use crate::error::ConfigurationError;
use crate::gam::{Gam, GamError, GamGroup, GamMemory, GamSignals, GamStatus};
use crate::scheduler::Scheduler;
use crate::signal::{ElementRange, SignalDescriptor, SignalDirection, SignalTable, validate_ranges};
use crate::state::StateCatalogue;

use super::Registries;

/// A configured group and the GAMs it feeds.
pub(crate) struct GroupEntry {
    pub(crate) name: String,
    pub(crate) group: Box<dyn GamGroup>,
    pub(crate) members: Vec<GamHandle>,
}

/// Everything `configure` hands over to the application.
pub(crate) struct Built {
    pub(crate) data_sources: Vec<Arc<dyn DataSource>>,
    pub(crate) ds_by_name: HashMap<String, usize>,
    pub(crate) arena: Arc<GamArena>,
    pub(crate) groups: Vec<GroupEntry>,
    pub(crate) states: StateCatalogue,
    /// `[state][data source][signal]`: signal touched by a GAM of the state.
    pub(crate) usage: Vec<Vec<Vec<bool>>>,
    pub(crate) index: Arc<BufferIndex>,
    pub(crate) scheduler: Scheduler,
}

/// One GAM signal bound to a data-source signal, before offsets exist.
#[derive(Debug, Clone)]
struct PendingBinding {
    data_source: usize,
    ds_signal: usize,
    gam_signal: usize,
    samples: u32,
    ranges: Vec<ElementRange>,
}

/// A GAM between creation and arena insertion.
struct PendingGam<'c> {
    config: &'c FunctionConfig,
    gam: Box<dyn Gam>,
    inputs: SignalTable,
    outputs: SignalTable,
    input_bindings: Vec<PendingBinding>,
    output_bindings: Vec<PendingBinding>,
}

pub(crate) fn build(config: &ApplicationConfig, registries: &Registries) -> Result<Built, ConfigurationError> {
    let types = &registries.types;

    // ─── Data sources and declared signals ──────────────────────────
    let mut sources: Vec<Box<dyn DataSource>> = Vec::with_capacity(config.data_sources.len());
    let mut ds_by_name: HashMap<String, usize> = HashMap::new();
    for dc in &config.data_sources {
        if ds_by_name.contains_key(&dc.name) {
            return Err(ConfigurationError::Duplicate {
                kind: "data source",
                name: dc.name.clone(),
            });
        }
        let ds_err = |source| ConfigurationError::DataSource {
            data_source: dc.name.clone(),
            source,
        };
        let mut ds = registries
            .data_sources
            .create(&dc.class, &dc.name, &dc.parameter_node())
            .map_err(ds_err)?;
        for decl in &dc.signals {
            let desc = declared_descriptor(types, &dc.name, decl)?;
            ds.signals_mut()
                .register(desc)
                .map_err(|e| ds_err(e.into()))?;
        }
        debug!(data_source = %dc.name, class = %dc.class, declared = dc.signals.len(), "data source created");
        ds_by_name.insert(dc.name.clone(), sources.len());
        sources.push(ds);
    }

    // ─── GAMs and signal resolution ─────────────────────────────────
    let mut pending: Vec<PendingGam<'_>> = Vec::with_capacity(config.functions.len());
    for fc in &config.functions {
        if pending.iter().any(|p| p.config.name == fc.name) {
            return Err(ConfigurationError::Duplicate {
                kind: "function",
                name: fc.name.clone(),
            });
        }
        let gam = registries
            .gams
            .create(&fc.class, &fc.name, &fc.parameter_node())
            .map_err(|source| ConfigurationError::Gam {
                gam: fc.name.clone(),
                source,
            })?;
        let mut p = PendingGam {
            config: fc,
            gam,
            inputs: SignalTable::new(),
            outputs: SignalTable::new(),
            input_bindings: Vec::new(),
            output_bindings: Vec::new(),
        };
        for sc in &fc.input_signals {
            let binding = resolve_signal(types, &mut sources, &ds_by_name, &fc.name, sc, &mut p.inputs)?;
            p.input_bindings.push(binding);
        }
        for sc in &fc.output_signals {
            let binding = resolve_signal(types, &mut sources, &ds_by_name, &fc.name, sc, &mut p.outputs)?;
            p.output_bindings.push(binding);
        }
        pending.push(p);
    }

    // ─── Allocation ─────────────────────────────────────────────────
    for ds in sources.iter_mut() {
        let name = ds.name().to_string();
        ds.allocate_memory()
            .map_err(|source| ConfigurationError::DataSource {
                data_source: name.clone(),
                source,
            })?;
        info!(
            data_source = %name,
            class = ds.class(),
            signals = ds.signals().len(),
            bytes = ds.signals().total_size(),
            buffers = ds.number_of_buffers(),
            "data source allocated"
        );
    }
    let sources: Vec<Arc<dyn DataSource>> = sources.into_iter().map(Arc::from).collect();
    let ds_names: Vec<Arc<str>> = sources.iter().map(|d| Arc::from(d.name())).collect();

    // ─── GAM setup and brokers ──────────────────────────────────────
    let index = Arc::new(BufferIndex::new());
    let mut arena = GamArena::new();
    let mut gam_usage: Vec<GamUsage> = Vec::with_capacity(pending.len());
    for mut p in pending {
        let gam_name = p.config.name.clone();
        let gam_err = |source| ConfigurationError::Gam {
            gam: gam_name.clone(),
            source,
        };
        p.inputs.assign_offsets().map_err(|e| gam_err(GamError::Signals(e.to_string())))?;
        p.outputs.assign_offsets().map_err(|e| gam_err(GamError::Signals(e.to_string())))?;
        let inputs: Arc<[SignalDescriptor]> = Arc::from(p.inputs.as_slice());
        let outputs: Arc<[SignalDescriptor]> = Arc::from(p.outputs.as_slice());
        p.gam
            .setup(&GamSignals {
                name: &gam_name,
                inputs: &inputs,
                outputs: &outputs,
            })
            .map_err(gam_err)?;

        let links = build_links(
            &gam_name,
            &sources,
            &ds_names,
            &p.input_bindings,
            &p.output_bindings,
            &inputs,
            &outputs,
            &index,
        )?;

        let hooks = p.gam.hooks();
        let memory = GamMemory::new(Arc::clone(&inputs), Arc::clone(&outputs));
        let handle = arena
            .insert(&gam_name, &p.config.class, p.gam, memory)
            .ok_or_else(|| ConfigurationError::Duplicate {
                kind: "function",
                name: gam_name.clone(),
            })?;
        if let Some(slot) = arena.get_mut(handle) {
            slot.set_links(links);
            slot.set_hooks(hooks);
            slot.set_status(GamStatus::Ready);
        }
        debug!(gam = %gam_name, class = %p.config.class, inputs = inputs.len(), outputs = outputs.len(), "GAM ready");
        gam_usage.push(GamUsage {
            reads: p.input_bindings.iter().map(|b| (b.data_source, b.ds_signal)).collect(),
            writes: p.output_bindings.iter().map(|b| (b.data_source, b.ds_signal)).collect(),
        });
    }

    // ─── Groups ─────────────────────────────────────────────────────
    let mut groups = Vec::with_capacity(config.groups.len());
    for (gi, gc) in config.groups.iter().enumerate() {
        let group_err = |source| ConfigurationError::Group {
            group: gc.name.clone(),
            source,
        };
        let mut group = registries.groups.create(&gc.class, &gc.name).map_err(group_err)?;
        group.initialise(&gc.parameter_node()).map_err(group_err)?;
        let mut members = Vec::with_capacity(gc.functions.len());
        for f in &gc.functions {
            let handle = arena.handle(f).ok_or_else(|| ConfigurationError::UnknownReference {
                owner: gc.name.clone(),
                kind: "function",
                name: f.clone(),
            })?;
            let Some(slot) = arena.get_mut(handle) else {
                continue;
            };
            if let Some(other) = slot.group() {
                let first = config.groups.get(other).map(|g| g.name.as_str()).unwrap_or("?");
                return Err(ConfigurationError::Duplicate {
                    kind: "group member",
                    name: format!("{f} (groups '{first}' and '{}')", gc.name),
                });
            }
            slot.set_group(gi);
            members.push(handle);
        }
        debug!(group = %gc.name, class = %gc.class, members = members.len(), "group initialised");
        groups.push(GroupEntry {
            name: gc.name.clone(),
            group,
            members,
        });
    }

    // ─── States ─────────────────────────────────────────────────────
    let states = StateCatalogue::build(&config.states, &arena)?;
    let mut usage = Vec::with_capacity(states.len());
    for state in states.iter() {
        check_state_signals(state, &arena, &gam_usage, &sources)?;
        let mut used: Vec<Vec<bool>> = sources.iter().map(|d| vec![false; d.signals().len()]).collect();
        for h in state.functions() {
            let Some(u) = gam_usage.get(h.index()) else {
                continue;
            };
            for &(d, s) in u.reads.iter().chain(u.writes.iter()) {
                if let Some(flag) = used.get_mut(d).and_then(|v| v.get_mut(s)) {
                    *flag = true;
                }
            }
        }
        usage.push(used);
    }
    for h in states.unused(&arena) {
        if let Some(slot) = arena.get(h) {
            warn!(gam = slot.name(), "GAM is not referenced by any state");
        }
    }

    // ─── Scheduler ──────────────────────────────────────────────────
    let arena = Arc::new(arena);
    let scheduler = Scheduler::configure_scheduler(
        &states,
        Arc::clone(&arena),
        Arc::clone(&index),
        config.scheduler.error_policy,
    )?;

    Ok(Built {
        data_sources: sources,
        ds_by_name,
        arena,
        groups,
        states,
        usage,
        index,
        scheduler,
    })
}

// ─── Descriptors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Shape {
    elements: u32,
    dimensions: u8,
    samples: u32,
}

impl Shape {
    fn from_parts(elements: Option<u32>, dimensions: Option<u8>, samples: Option<u32>) -> Self {
        let elements = elements.unwrap_or(1);
        Self {
            elements,
            dimensions: dimensions.unwrap_or(if elements == 1 { 0 } else { 1 }),
            samples: samples.unwrap_or(1),
        }
    }
}

fn descriptor(
    types: &TypeRegistry,
    owner: &str,
    name: &str,
    type_name: &str,
    shape: Shape,
    default: Option<&toml::Value>,
) -> Result<SignalDescriptor, ConfigurationError> {
    let context = || format!("{owner}.{name}");
    let td = types.lookup(type_name).ok_or_else(|| ConfigurationError::Type {
        context: context(),
        source: TypeError::UnknownType(type_name.to_string()),
    })?;
    let scalar = td.scalar();
    let default = match default {
        None => None,
        Some(value) => {
            let kind = scalar.ok_or_else(|| ConfigurationError::InvalidSignal {
                owner: owner.to_string(),
                signal: name.to_string(),
                reason: format!("defaults need a scalar type, '{type_name}' is structured"),
            })?;
            Some(
                kind.encode(value, shape.elements as usize)
                    .map_err(|source| ConfigurationError::Type {
                        context: context(),
                        source,
                    })?,
            )
        }
    };
    Ok(SignalDescriptor {
        name: name.to_string(),
        type_id: td.id,
        type_name: td.name.clone(),
        scalar,
        element_size: td.element_size,
        number_of_dimensions: shape.dimensions,
        number_of_elements: shape.elements,
        number_of_samples: shape.samples,
        byte_offset: 0,
        default,
    })
}

fn declared_descriptor(
    types: &TypeRegistry,
    data_source: &str,
    decl: &DeclaredSignal,
) -> Result<SignalDescriptor, ConfigurationError> {
    let shape = Shape::from_parts(
        decl.number_of_elements,
        decl.number_of_dimensions,
        decl.number_of_samples,
    );
    descriptor(types, data_source, &decl.name, &decl.type_name, shape, decl.default.as_ref())
}

// ─── Resolution ─────────────────────────────────────────────────────

/// Resolve one GAM signal against its data source, registering it in
/// `table` (the GAM's input or output table) and, when the data source does
/// not know it yet, in the data source.
fn resolve_signal(
    types: &TypeRegistry,
    sources: &mut [Box<dyn DataSource>],
    ds_by_name: &HashMap<String, usize>,
    gam: &str,
    sc: &SignalConfig,
    table: &mut SignalTable,
) -> Result<PendingBinding, ConfigurationError> {
    let ds_idx = *ds_by_name
        .get(&sc.data_source)
        .ok_or_else(|| ConfigurationError::UnknownReference {
            owner: format!("{gam}.{}", sc.name),
            kind: "data source",
            name: sc.data_source.clone(),
        })?;
    let Some(ds) = sources.get_mut(ds_idx) else {
        return Err(ConfigurationError::UnknownReference {
            owner: format!("{gam}.{}", sc.name),
            kind: "data source",
            name: sc.data_source.clone(),
        });
    };
    let ds_signal_name = sc.data_source_signal();
    let ranges: Vec<ElementRange> = sc
        .ranges
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|[first, last]| ElementRange::new(*first, *last))
        .collect();
    let invalid = |reason: String| ConfigurationError::InvalidSignal {
        owner: gam.to_string(),
        signal: sc.name.clone(),
        reason,
    };
    let mismatch = |reason: String| ConfigurationError::SignalMismatch {
        gam: gam.to_string(),
        data_source: sc.data_source.clone(),
        signal: sc.name.clone(),
        reason,
    };
    let ds_err = |source| ConfigurationError::DataSource {
        data_source: sc.data_source.clone(),
        source,
    };

    let (ds_signal, gam_desc) = match ds.signals().find(ds_signal_name) {
        Some(idx) => {
            let Some(declared) = ds.signals().get(idx).cloned() else {
                return Err(invalid(format!("data source lost signal '{ds_signal_name}'")));
            };
            let type_name = sc.type_name.as_deref().unwrap_or(&declared.type_name);
            let shape = if ranges.is_empty() {
                Shape {
                    elements: sc.number_of_elements.unwrap_or(declared.number_of_elements),
                    dimensions: sc.number_of_dimensions.unwrap_or(declared.number_of_dimensions),
                    samples: sc.number_of_samples.unwrap_or(1),
                }
            } else {
                let selected = validate_ranges(&ranges, declared.number_of_elements).map_err(&invalid)?;
                if let Some(n) = sc.number_of_elements.filter(|n| *n != selected) {
                    return Err(mismatch(format!("ranges select {selected} elements, signal declares {n}")));
                }
                Shape::from_parts(Some(selected), sc.number_of_dimensions, sc.number_of_samples)
            };
            let mut desc = descriptor(types, gam, &sc.name, type_name, shape, sc.default.as_ref())?;
            if desc.type_id != declared.type_id {
                return Err(mismatch(format!(
                    "type {} differs from {}",
                    desc.type_name, declared.type_name
                )));
            }
            if ranges.is_empty()
                && (desc.number_of_elements != declared.number_of_elements
                    || desc.number_of_dimensions != declared.number_of_dimensions)
            {
                return Err(mismatch(format!(
                    "{} elements / {} dimensions vs {} / {}",
                    desc.number_of_elements,
                    desc.number_of_dimensions,
                    declared.number_of_elements,
                    declared.number_of_dimensions
                )));
            }
            if desc.number_of_samples > declared.number_of_samples {
                return Err(mismatch(format!(
                    "{} samples requested, data source holds {}",
                    desc.number_of_samples, declared.number_of_samples
                )));
            }
            if ranges.is_empty() {
                match (&declared.default, &desc.default) {
                    (Some(d), None) => desc.default = Some(d.clone()),
                    (None, Some(g)) => {
                        if let Some(target) = ds.signals_mut().get_mut(idx) {
                            target.default = Some(g.clone());
                        }
                    }
                    _ => {}
                }
            }
            (idx, desc)
        }
        None => {
            if !ranges.is_empty() {
                return Err(invalid(format!(
                    "ranges need '{ds_signal_name}' to be declared by '{}'",
                    sc.data_source
                )));
            }
            let type_name = sc
                .type_name
                .as_deref()
                .ok_or_else(|| invalid("type is required for a signal the data source does not declare".to_string()))?;
            let shape = Shape::from_parts(sc.number_of_elements, sc.number_of_dimensions, sc.number_of_samples);
            let desc = descriptor(types, gam, &sc.name, type_name, shape, sc.default.as_ref())?;
            let mut ds_desc = desc.clone();
            ds_desc.name = ds_signal_name.to_string();
            let idx = ds.signals_mut().register(ds_desc).map_err(|e| ds_err(e.into()))?;
            debug!(gam, data_source = %sc.data_source, signal = ds_signal_name, "signal defined by GAM");
            (idx, desc)
        }
    };

    let samples = gam_desc.number_of_samples;
    let gam_signal = table
        .register(gam_desc)
        .map_err(|e| invalid(e.to_string()))?;
    Ok(PendingBinding {
        data_source: ds_idx,
        ds_signal,
        gam_signal,
        samples,
        ranges,
    })
}

// ─── Brokers ────────────────────────────────────────────────────────

/// One link per data source, in first-appearance order (inputs, then
/// outputs).
#[allow(clippy::too_many_arguments)]
fn build_links(
    gam: &str,
    sources: &[Arc<dyn DataSource>],
    ds_names: &[Arc<str>],
    input_bindings: &[PendingBinding],
    output_bindings: &[PendingBinding],
    inputs: &[SignalDescriptor],
    outputs: &[SignalDescriptor],
    index: &Arc<BufferIndex>,
) -> Result<Vec<BrokerLink>, ConfigurationError> {
    let mut order: Vec<usize> = Vec::new();
    for b in input_bindings.iter().chain(output_bindings.iter()) {
        if !order.contains(&b.data_source) {
            order.push(b.data_source);
        }
    }

    let resolve = |pending: &[PendingBinding], table: &[SignalDescriptor], ds: usize| -> Vec<SignalBinding> {
        pending
            .iter()
            .filter(|b| b.data_source == ds)
            .filter_map(|b| {
                table.get(b.gam_signal).map(|sig| SignalBinding {
                    gam_offset: sig.byte_offset,
                    ds_signal: b.ds_signal,
                    samples: b.samples,
                    ranges: b.ranges.clone(),
                })
            })
            .collect()
    };

    let mut links = Vec::with_capacity(order.len());
    for d in order {
        let (Some(ds), Some(name)) = (sources.get(d), ds_names.get(d)) else {
            continue;
        };
        let input = resolve(input_bindings, inputs, d);
        let output = resolve(output_bindings, outputs, d);
        links.push(BrokerLink {
            data_source: Arc::clone(name),
            inputs: build_brokers(gam, ds.as_ref(), name, SignalDirection::Input, &input, index)?,
            outputs: build_brokers(gam, ds.as_ref(), name, SignalDirection::Output, &output, index)?,
        });
    }
    Ok(links)
}

// ─── State checks ───────────────────────────────────────────────────

/// Data-source signals read and written by one GAM.
struct GamUsage {
    reads: Vec<(usize, usize)>,
    writes: Vec<(usize, usize)>,
}

/// One producer per signal per state; producer and consumers in one thread.
fn check_state_signals(
    state: &crate::state::RealTimeState,
    arena: &GamArena,
    usage: &[GamUsage],
    sources: &[Arc<dyn DataSource>],
) -> Result<(), ConfigurationError> {
    let gam_name = |h: GamHandle| arena.get(h).map(|s| s.name().to_string()).unwrap_or_default();
    let signal_label = |(d, s): (usize, usize)| -> (String, String) {
        match sources.get(d) {
            Some(ds) => (
                ds.name().to_string(),
                ds.signals().get(s).map(|x| x.name.clone()).unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        }
    };

    let mut producers: HashMap<(usize, usize), (GamHandle, usize)> = HashMap::new();
    for (t, thread) in state.threads().iter().enumerate() {
        for &h in thread.functions() {
            let Some(u) = usage.get(h.index()) else {
                continue;
            };
            for &key in &u.writes {
                if let Some(&(first, _)) = producers.get(&key) {
                    if first == h {
                        continue;
                    }
                    let (data_source, signal) = signal_label(key);
                    return Err(ConfigurationError::ProducerConflict {
                        state: state.name().to_string(),
                        data_source,
                        signal,
                        first: gam_name(first),
                        second: gam_name(h),
                    });
                }
                producers.insert(key, (h, t));
            }
        }
    }

    for (t, thread) in state.threads().iter().enumerate() {
        for &h in thread.functions() {
            let Some(u) = usage.get(h.index()) else {
                continue;
            };
            for key in &u.reads {
                let Some(&(_, pt)) = producers.get(key) else {
                    continue;
                };
                if pt != t {
                    let (data_source, signal) = signal_label(*key);
                    let thread_name = |i: usize| {
                        state
                            .threads()
                            .get(i)
                            .map(|x| x.name().to_string())
                            .unwrap_or_default()
                    };
                    return Err(ConfigurationError::CrossThreadSignal {
                        state: state.name().to_string(),
                        data_source,
                        signal,
                        producer: thread_name(pt),
                        consumer: thread_name(t),
                    });
                }
            }
        }
    }
    Ok(())
}
