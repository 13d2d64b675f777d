//! State transitions: contexts installed before the first cycle, a refused
//! transition leaves status, buffer index and every context untouched, and
//! transition hooks never hold up a running thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cadence_common::tree::ConfigNode;
use cadence_core::datasource::read_values;
use cadence_core::gam::{GamError, GamGroup, ParameterContext, SharedContext};
use cadence_core::{ApplicationStatus, TransitionError};

use super::{configure, configure_with, test_registries};

const TUNED: &str = r#"
[application]
name = "Tuned"

[[data_sources]]
name = "D"
class = "GAMDataSource"
[[data_sources.signals]]
name = "In"
type = "float64"
default = 2.0

[[functions]]
name = "Amp"
class = "GainGAM"
[functions.parameters]
gain_parameter = "k"
[[functions.input_signals]]
name = "In"
data_source = "D"
[[functions.output_signals]]
name = "Out"
data_source = "D"
type = "float64"

[[groups]]
name = "Tuning"
class = "ParameterGroup"
functions = ["Amp"]
[groups.parameters]
k = 3.0

[[states]]
name = "Run"
[[states.threads]]
name = "T"
functions = ["Amp"]
"#;

#[test]
fn group_context_reaches_member_before_first_cycle() {
    let mut app = configure(TUNED);
    app.prepare_next_state("Run").unwrap();
    let report = app.execute_single_cycle("T").unwrap();
    assert!(report.is_ok(), "{:?}", report.error);
    let d = app.data_source("D").unwrap();
    assert_eq!(read_values::<f64>(d.as_ref(), "Out", app.buffer_index()).unwrap(), vec![6.0]);
}

/// Group whose context is not a `ParameterContext`.
struct WrongContext;

impl GamGroup for WrongContext {
    fn initialise(&mut self, _params: &ConfigNode) -> Result<(), GamError> {
        Ok(())
    }

    fn context(&self) -> SharedContext {
        Arc::new(String::from("not parameters"))
    }
}

#[test]
fn rejected_context_aborts_transition() {
    let mut registries = test_registries();
    registries
        .groups
        .register("WrongContext", |_| Ok(Box::new(WrongContext) as Box<dyn GamGroup>));
    let source = TUNED.replace("class = \"ParameterGroup\"", "class = \"WrongContext\"");
    let mut app = configure_with(&source, &registries);

    let err = app.prepare_next_state("Run").unwrap_err();
    assert!(
        matches!(
            &err,
            TransitionError::ContextRejected {
                source: GamError::ContextKind { .. },
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(app.status(), &ApplicationStatus::Configured);
    assert_eq!(app.buffer_index(), 0);
    assert!(app.current_state().is_none());
    assert!(app.execute_single_cycle("T").is_err());
}

const PICKY: &str = r#"
[application]
name = "Picky"

[[data_sources]]
name = "D"
class = "GAMDataSource"

[[functions]]
name = "Count"
class = "Counter"
[[functions.output_signals]]
name = "C"
data_source = "D"
type = "uint32"

[[functions]]
name = "Gate"
class = "Picky"
[functions.parameters]
refuse = "Locked"

[[states]]
name = "Run"
[[states.threads]]
name = "T"
functions = ["Count"]

[[states]]
name = "Locked"
[[states.threads]]
name = "T"
functions = ["Count", "Gate"]
"#;

#[test]
fn refused_transition_keeps_active_state() {
    let mut app = configure_with(PICKY, &test_registries());
    app.prepare_next_state("Run").unwrap();
    app.execute_single_cycle("T").unwrap();
    app.execute_single_cycle("T").unwrap();
    let buffer = app.buffer_index();

    let err = app.prepare_next_state("Locked").unwrap_err();
    assert!(matches!(err, TransitionError::Gam { ref gam, .. } if gam == "Gate"), "{err}");
    assert_eq!(app.status(), &ApplicationStatus::StateActive("Run".into()));
    assert_eq!(app.buffer_index(), buffer);
    assert_eq!(app.current_state(), Some("Run"));

    // The active state keeps running on the same buffer.
    app.execute_single_cycle("T").unwrap();
    let d = app.data_source("D").unwrap();
    assert_eq!(read_values::<u32>(d.as_ref(), "C", buffer).unwrap(), vec![3]);
}

#[test]
fn transition_to_same_state_is_allowed() {
    let mut app = configure_with(PICKY, &test_registries());
    app.prepare_next_state("Run").unwrap();
    app.execute_single_cycle("T").unwrap();
    app.prepare_next_state("Run").unwrap();
    assert_eq!(app.buffer_index(), 0);
    // C was used before and after, so it was carried into the new buffer.
    let d = app.data_source("D").unwrap();
    assert_eq!(read_values::<u32>(d.as_ref(), "C", 0).unwrap(), vec![1]);
}

#[test]
fn unknown_state_is_rejected() {
    let mut app = configure(TUNED);
    assert!(matches!(
        app.prepare_next_state("Missing"),
        Err(TransitionError::UnknownState(_))
    ));
}

/// Group whose context for state `S` holds `k = k_S`; a state without a
/// `k_S` parameter gets an empty context.
#[derive(Default)]
struct PerState {
    gains: HashMap<String, f64>,
}

impl GamGroup for PerState {
    fn initialise(&mut self, params: &ConfigNode) -> Result<(), GamError> {
        for key in params.keys() {
            self.gains.insert(key.to_string(), params.get_f64(key)?);
        }
        Ok(())
    }

    fn context(&self) -> SharedContext {
        Arc::new(ParameterContext::default())
    }

    fn prepare_next_state(&self, _current: Option<&str>, next: &str) -> Result<SharedContext, GamError> {
        let values = match self.gains.get(&format!("k_{next}")) {
            Some(&k) => HashMap::from([("k".to_string(), k)]),
            None => HashMap::new(),
        };
        Ok(Arc::new(ParameterContext::new(values)))
    }
}

const TWO_GROUPS: &str = r#"
[application]
name = "TwoGroups"

[[data_sources]]
name = "D"
class = "GAMDataSource"
[[data_sources.signals]]
name = "In"
type = "float64"
default = 2.0

[[functions]]
name = "Amp1"
class = "GainGAM"
[functions.parameters]
gain_parameter = "k"
[[functions.input_signals]]
name = "In"
data_source = "D"
[[functions.output_signals]]
name = "Out1"
data_source = "D"
type = "float64"

[[functions]]
name = "Amp2"
class = "GainGAM"
[functions.parameters]
gain_parameter = "k"
[[functions.input_signals]]
name = "In"
data_source = "D"
[[functions.output_signals]]
name = "Out2"
data_source = "D"
type = "float64"

[[groups]]
name = "G1"
class = "PerState"
functions = ["Amp1"]
[groups.parameters]
k_Run = 2.0
k_Boost = 10.0

[[groups]]
name = "G2"
class = "PerState"
functions = ["Amp2"]
[groups.parameters]
k_Run = 3.0

[[states]]
name = "Run"
[[states.threads]]
name = "T"
functions = ["Amp1", "Amp2"]

[[states]]
name = "Boost"
[[states.threads]]
name = "T"
functions = ["Amp1", "Amp2"]
"#;

#[test]
fn rejection_by_a_later_group_changes_no_member() {
    let mut registries = test_registries();
    registries
        .groups
        .register("PerState", |_| Ok(Box::new(PerState::default()) as Box<dyn GamGroup>));
    let mut app = configure_with(TWO_GROUPS, &registries);
    app.prepare_next_state("Run").unwrap();
    app.execute_single_cycle("T").unwrap();
    let buffer = app.buffer_index();
    let d = Arc::clone(app.data_source("D").unwrap());
    assert_eq!(read_values::<f64>(d.as_ref(), "Out1", buffer).unwrap(), vec![4.0]);
    assert_eq!(read_values::<f64>(d.as_ref(), "Out2", buffer).unwrap(), vec![6.0]);

    // G1 has a gain for Boost, G2 does not: Amp2 refuses after G1 was asked.
    let err = app.prepare_next_state("Boost").unwrap_err();
    assert!(
        matches!(
            &err,
            TransitionError::ContextRejected { group, gam, source: GamError::ContextEntry(_) }
                if group == "G2" && gam == "Amp2"
        ),
        "{err}"
    );
    assert_eq!(app.status(), &ApplicationStatus::StateActive("Run".into()));
    assert_eq!(app.buffer_index(), buffer);

    // Amp1 still runs with its Run gain, not the Boost one G1 offered.
    app.execute_single_cycle("T").unwrap();
    assert_eq!(read_values::<f64>(d.as_ref(), "Out1", buffer).unwrap(), vec![4.0]);
    assert_eq!(read_values::<f64>(d.as_ref(), "Out2", buffer).unwrap(), vec![6.0]);
}

const SLOW_HOOK: &str = r#"
[application]
name = "SlowHook"

[[data_sources]]
name = "D"
class = "GAMDataSource"

[[functions]]
name = "Count"
class = "Counter"
[[functions.output_signals]]
name = "C"
data_source = "D"
type = "uint32"

[[functions]]
name = "Deliberate"
class = "Lazy"
[functions.parameters]
hook_ms = 300

[[states]]
name = "S1"
[[states.threads]]
name = "T"
functions = ["Count", "Deliberate"]
cycle_time_us = 1000

[[states]]
name = "S2"
[[states.threads]]
name = "T"
functions = ["Deliberate"]
"#;

#[test]
fn slow_transition_hook_does_not_stall_running_thread() {
    let mut app = configure_with(SLOW_HOOK, &test_registries());
    app.prepare_next_state("S1").unwrap();
    app.start_execution().unwrap();
    let counters = |app: &cadence_core::RealTimeApplication| {
        app.scheduler().thread_schedule("S1", "T").unwrap().counters()
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while counters(&app).cycles < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    let before = counters(&app).cycles;
    assert!(before >= 5);

    // Deliberate runs in both states; its hook runs while S1 executes it.
    let t0 = Instant::now();
    app.prepare_next_state("S2").unwrap();
    assert!(t0.elapsed() >= Duration::from_millis(300));

    let after = counters(&app);
    app.stop_execution();
    assert!(after.cycles - before >= 10, "{} cycles during the transition", after.cycles - before);
    assert!(after.max_cycle_ns < 100_000_000, "max cycle {} ns", after.max_cycle_ns);
}
