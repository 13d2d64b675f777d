//! Resolved signal descriptors and packed signal tables.
//!
//! A [`SignalTable`] is the ordered list of signals owned by one memory block
//! (a data source, or the input/output block of a GAM). Byte offsets are
//! assigned in registration order and are strictly increasing: signal `i+1`
//! starts where signal `i` ends.

use std::collections::HashMap;

use cadence_common::types::{ScalarKind, TypeId};

// ─── Direction ──────────────────────────────────────────────────────

/// Which way a broker moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalDirection {
    /// Data source → GAM input block.
    Input,
    /// GAM output block → data source.
    Output,
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

// ─── Descriptor ─────────────────────────────────────────────────────

/// Fully resolved signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescriptor {
    /// Signal name, unique within its table.
    pub name: String,
    /// Registry id of the element type.
    pub type_id: TypeId,
    /// Registry name of the element type.
    pub type_name: String,
    /// Scalar kind, `None` for structured types.
    pub scalar: Option<ScalarKind>,
    /// Bytes per element.
    pub element_size: usize,
    /// 0 = scalar, 1 = vector, 2/3 = matrix.
    pub number_of_dimensions: u8,
    /// Elements per sample.
    pub number_of_elements: u32,
    /// Samples per cycle.
    pub number_of_samples: u32,
    /// Offset inside the owning block; set by [`SignalTable::assign_offsets`].
    pub byte_offset: usize,
    /// Encoded default for one sample.
    pub default: Option<Vec<u8>>,
}

impl SignalDescriptor {
    /// Bytes of one sample.
    pub fn sample_size(&self) -> usize {
        self.element_size * self.number_of_elements as usize
    }

    /// Bytes of the whole signal (all samples).
    pub fn byte_size(&self) -> usize {
        self.sample_size() * self.number_of_samples as usize
    }

    /// Byte range inside the owning block.
    pub fn byte_range(&self) -> std::ops::Range<usize> {
        self.byte_offset..self.byte_offset + self.byte_size()
    }

    /// Same type, element count and dimensionality.
    pub fn same_shape(&self, other: &SignalDescriptor) -> bool {
        self.type_id == other.type_id
            && self.number_of_elements == other.number_of_elements
            && self.number_of_dimensions == other.number_of_dimensions
    }
}

// ─── Element ranges ─────────────────────────────────────────────────

/// Inclusive element range `[first, last]` of an array signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementRange {
    pub first: u32,
    pub last: u32,
}

impl ElementRange {
    pub fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    /// Number of elements covered.
    pub fn count(&self) -> u32 {
        self.last - self.first + 1
    }
}

/// Check that ranges are well formed, ascending, non-overlapping and fit in
/// `elements`. Returns the number of selected elements.
pub fn validate_ranges(ranges: &[ElementRange], elements: u32) -> Result<u32, String> {
    if ranges.is_empty() {
        return Err("empty range list".to_string());
    }
    let mut selected = 0u32;
    let mut next_free = 0u32;
    for (i, r) in ranges.iter().enumerate() {
        if r.first > r.last {
            return Err(format!("range {i} is reversed ({} > {})", r.first, r.last));
        }
        if r.last >= elements {
            return Err(format!(
                "range {i} ends at element {} but the signal has {elements}",
                r.last
            ));
        }
        if i > 0 && r.first < next_free {
            return Err(format!("range {i} overlaps or precedes range {}", i - 1));
        }
        next_free = r.last + 1;
        selected += r.count();
    }
    Ok(selected)
}

// ─── Table ──────────────────────────────────────────────────────────

/// Errors raised while building a [`SignalTable`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalTableError {
    #[error("signal '{0}' is already registered")]
    Duplicate(String),

    #[error("signal '{0}' has zero size")]
    ZeroSized(String),

    #[error("signal table is sealed")]
    Sealed,
}

/// Ordered, packed list of signals of one memory block.
#[derive(Debug, Clone, Default)]
pub struct SignalTable {
    signals: Vec<SignalDescriptor>,
    by_name: HashMap<String, usize>,
    total_size: usize,
    sealed: bool,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a signal and return its index.
    pub fn register(&mut self, signal: SignalDescriptor) -> Result<usize, SignalTableError> {
        if self.sealed {
            return Err(SignalTableError::Sealed);
        }
        if self.by_name.contains_key(&signal.name) {
            return Err(SignalTableError::Duplicate(signal.name));
        }
        let idx = self.signals.len();
        self.by_name.insert(signal.name.clone(), idx);
        self.signals.push(signal);
        Ok(idx)
    }

    /// Mutable access before sealing (used to grow sample counts or adopt
    /// defaults while GAMs are resolved).
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut SignalDescriptor> {
        if self.sealed {
            return None;
        }
        self.signals.get_mut(idx)
    }

    /// Assign packed offsets in registration order and seal the table.
    /// Returns the total block size.
    pub fn assign_offsets(&mut self) -> Result<usize, SignalTableError> {
        let mut offset = 0usize;
        for s in &mut self.signals {
            let size = s.byte_size();
            if size == 0 {
                return Err(SignalTableError::ZeroSized(s.name.clone()));
            }
            s.byte_offset = offset;
            offset += size;
        }
        self.total_size = offset;
        self.sealed = true;
        Ok(offset)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, idx: usize) -> Option<&SignalDescriptor> {
        self.signals.get(idx)
    }

    pub fn as_slice(&self) -> &[SignalDescriptor] {
        &self.signals
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalDescriptor> {
        self.signals.iter()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Total packed size; zero until offsets are assigned.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}
