//! Packing and range properties.

use cadence_common::types::{ScalarKind, TypeRegistry};
use cadence_core::datasource::{read_values, write_values};
use cadence_core::signal::{ElementRange, SignalDescriptor, SignalTable, validate_ranges};
use proptest::prelude::*;

use super::configure;

fn descriptor(types: &TypeRegistry, name: String, kind: ScalarKind, elements: u32, samples: u32) -> SignalDescriptor {
    let td = types.lookup(kind.name()).unwrap();
    SignalDescriptor {
        name,
        type_id: td.id,
        type_name: td.name.clone(),
        scalar: Some(kind),
        element_size: td.element_size,
        number_of_dimensions: u8::from(elements > 1),
        number_of_elements: elements,
        number_of_samples: samples,
        byte_offset: 0,
        default: None,
    }
}

fn kind() -> impl Strategy<Value = ScalarKind> {
    (0..ScalarKind::ALL.len()).prop_map(|i| ScalarKind::ALL[i])
}

/// Ascending, disjoint ranges inside `elements`, built from gaps and lengths.
fn ranges(elements: u32) -> impl Strategy<Value = Vec<ElementRange>> {
    prop::collection::vec((0u32..3, 1u32..4), 1..4).prop_filter_map("ranges overflow the signal", move |parts| {
        let mut out = Vec::new();
        let mut at = 0u32;
        for (gap, len) in parts {
            let first = at + gap;
            let last = first + len - 1;
            if last >= elements {
                return None;
            }
            out.push(ElementRange::new(first, last));
            at = last + 1;
        }
        Some(out)
    })
}

proptest! {
    #[test]
    fn offsets_are_packed_in_registration_order(
        shapes in prop::collection::vec((kind(), 1u32..16, 1u32..4), 1..12),
    ) {
        let types = TypeRegistry::with_builtin();
        let mut table = SignalTable::new();
        for (i, (k, elements, samples)) in shapes.iter().enumerate() {
            table.register(descriptor(&types, format!("s{i}"), *k, *elements, *samples)).unwrap();
        }
        let total = table.assign_offsets().unwrap();

        let mut expected = 0usize;
        for (s, (k, elements, samples)) in table.iter().zip(&shapes) {
            prop_assert_eq!(s.byte_offset, expected);
            prop_assert_eq!(s.byte_size(), k.size() * *elements as usize * *samples as usize);
            expected += s.byte_size();
        }
        prop_assert_eq!(total, expected);
        prop_assert_eq!(table.total_size(), expected);
        prop_assert!(table.is_sealed());
    }

    #[test]
    fn generated_ranges_validate(selection in ranges(12)) {
        let counted: u32 = selection.iter().map(ElementRange::count).sum();
        prop_assert_eq!(validate_ranges(&selection, 12), Ok(counted));
        let mut reversed = selection.clone();
        reversed.reverse();
        if reversed.len() > 1 {
            prop_assert!(validate_ranges(&reversed, 12).is_err());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn ranged_input_copies_selected_elements(selection in ranges(8)) {
        let spec = selection
            .iter()
            .map(|r| format!("[{}, {}]", r.first, r.last))
            .collect::<Vec<_>>()
            .join(", ");
        let count: u32 = selection.iter().map(ElementRange::count).sum();
        let source = format!(
            r#"
[application]
name = "Ranges"

[[data_sources]]
name = "M"
class = "SharedMemoryDataSource"
[[data_sources.signals]]
name = "Full"
type = "uint16"
number_of_elements = 8

[[functions]]
name = "Pick"
class = "IOGAM"
[[functions.input_signals]]
name = "Full"
data_source = "M"
ranges = [{spec}]
[[functions.output_signals]]
name = "Picked"
data_source = "M"
type = "uint16"
number_of_elements = {count}

[[states]]
name = "S"
[[states.threads]]
name = "T"
functions = ["Pick"]
"#
        );
        let mut app = configure(&source);
        app.prepare_next_state("S").unwrap();
        let m = app.data_source("M").unwrap().clone();
        let full: Vec<u16> = (0..8).map(|i| 100 + i).collect();
        write_values(m.as_ref(), "Full", 0, &full).unwrap();
        let report = app.execute_single_cycle("T").unwrap();
        prop_assert!(report.is_ok());

        let expected: Vec<u16> = selection
            .iter()
            .flat_map(|r| r.first..=r.last)
            .map(|i| full[i as usize])
            .collect();
        prop_assert_eq!(read_values::<u16>(m.as_ref(), "Picked", 0).unwrap(), expected);
    }
}
