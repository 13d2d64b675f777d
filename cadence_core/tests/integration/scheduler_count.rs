//! Executable counts: one record per data source a GAM touches, at least one
//! per GAM.

use cadence_core::gam::{Gam, GamError, GamMemory, GamSignals};
use cadence_core::{Registries, SchedulerError};
use proptest::prelude::*;

use super::configure_with;

/// Accepts any signals and does nothing.
struct Nop;

impl Gam for Nop {
    fn setup(&mut self, _signals: &GamSignals<'_>) -> Result<(), GamError> {
        Ok(())
    }

    fn execute(&mut self, _memory: &mut GamMemory) -> Result<(), GamError> {
        Ok(())
    }
}

fn registries() -> Registries {
    let mut r = Registries::default();
    r.gams.register("Nop", |_, _| Ok(Box::new(Nop) as Box<dyn Gam>));
    r
}

const SOURCES: [&str; 3] = ["A", "B", "C"];

/// For each GAM: which sources it reads from and which it writes to.
type Wiring = Vec<([bool; 3], [bool; 3])>;

fn document(wiring: &Wiring) -> String {
    let mut doc = String::from("[application]\nname = \"Counts\"\n");
    for ds in SOURCES {
        doc += &format!("\n[[data_sources]]\nname = \"{ds}\"\nclass = \"SharedMemoryDataSource\"\n");
    }
    let mut names = Vec::new();
    for (g, (reads, writes)) in wiring.iter().enumerate() {
        let name = format!("G{g}");
        doc += &format!("\n[[functions]]\nname = \"{name}\"\nclass = \"Nop\"\n");
        for (d, ds) in SOURCES.iter().enumerate() {
            if reads[d] {
                doc += &format!(
                    "[[functions.input_signals]]\nname = \"in_{g}_{d}\"\ndata_source = \"{ds}\"\ntype = \"uint8\"\n"
                );
            }
        }
        for (d, ds) in SOURCES.iter().enumerate() {
            if writes[d] {
                doc += &format!(
                    "[[functions.output_signals]]\nname = \"out_{g}_{d}\"\ndata_source = \"{ds}\"\ntype = \"uint8\"\n"
                );
            }
        }
        names.push(format!("\"{name}\""));
    }
    doc += &format!(
        "\n[[states]]\nname = \"S\"\n[[states.threads]]\nname = \"T\"\nfunctions = [{}]\n",
        names.join(", ")
    );
    doc
}

fn expected(wiring: &Wiring) -> usize {
    wiring
        .iter()
        .map(|(r, w)| (0..3).filter(|&d| r[d] || w[d]).count().max(1))
        .sum()
}

fn wiring() -> impl Strategy<Value = Wiring> {
    prop::collection::vec((any::<[bool; 3]>(), any::<[bool; 3]>()), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn count_is_gams_times_touched_sources(w in wiring()) {
        let app = configure_with(&document(&w), &registries());
        prop_assert_eq!(app.number_of_executables("S", "T").unwrap(), expected(&w));
    }
}

#[test]
fn signal_free_gam_still_scheduled() {
    let w: Wiring = vec![([false; 3], [false; 3]), ([true, false, false], [false, false, true])];
    let mut app = configure_with(&document(&w), &registries());
    assert_eq!(app.number_of_executables("S", "T").unwrap(), 3);

    let schedule = app.scheduler().thread_schedule("S", "T").unwrap();
    let sources: Vec<Option<&str>> = schedule.executables().iter().map(|e| e.data_source()).collect();
    assert_eq!(sources, vec![None, Some("A"), Some("C")]);

    app.prepare_next_state("S").unwrap();
    let report = app.execute_single_cycle("T").unwrap();
    assert_eq!(report.executed, 3);
}

#[test]
fn unknown_state_and_thread() {
    let w: Wiring = vec![([true, false, false], [false; 3])];
    let app = configure_with(&document(&w), &registries());
    assert!(matches!(
        app.number_of_executables("Missing", "T"),
        Err(SchedulerError::UnknownState(s)) if s == "Missing"
    ));
    assert!(matches!(
        app.number_of_executables("S", "Missing"),
        Err(SchedulerError::UnknownThread { thread, .. }) if thread == "Missing"
    ));
}
