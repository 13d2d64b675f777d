//! The two-GAM pipeline: A writes X into D1, B reads X from D1 and writes
//! Y = 2·X into D2. B runs before A in the thread, so each cycle B sees the
//! value A wrote in the previous cycle.

use cadence_core::ApplicationStatus;
use cadence_core::datasource::read_values;

use super::configure;

const PIPELINE: &str = r#"
[application]
name = "Pipeline"
initial_state = "Run"

[[data_sources]]
name = "D1"
class = "GAMDataSource"
[[data_sources.signals]]
name = "X"
type = "float64"
default = 1.5

[[data_sources]]
name = "D2"
class = "SharedMemoryDataSource"

[[functions]]
name = "B"
class = "GainGAM"
[functions.parameters]
gain = 2.0
[[functions.input_signals]]
name = "X"
data_source = "D1"
[[functions.output_signals]]
name = "Y"
data_source = "D2"
type = "float64"

[[functions]]
name = "A"
class = "ConstantGAM"
[[functions.output_signals]]
name = "X"
data_source = "D1"
default = 4.0

[[states]]
name = "Run"
[[states.threads]]
name = "Thread1"
functions = ["B", "A"]
"#;

#[test]
fn pipeline_follows_previous_cycle() {
    let mut app = configure(PIPELINE);
    assert_eq!(app.number_of_executables("Run", "Thread1").unwrap(), 3);

    app.prepare_next_state("Run").unwrap();
    assert_eq!(app.status(), &ApplicationStatus::StateActive("Run".into()));
    let d1 = app.data_source("D1").unwrap().clone();
    let d2 = app.data_source("D2").unwrap().clone();

    let r1 = app.execute_single_cycle("Thread1").unwrap();
    assert!(r1.is_ok(), "{:?}", r1.error);
    assert_eq!(r1.executed, 3);
    assert_eq!(read_values::<f64>(d2.as_ref(), "Y", 0).unwrap(), vec![3.0]);
    let active = app.buffer_index();
    assert_eq!(read_values::<f64>(d1.as_ref(), "X", active).unwrap(), vec![4.0]);

    app.execute_single_cycle("Thread1").unwrap();
    assert_eq!(read_values::<f64>(d2.as_ref(), "Y", 0).unwrap(), vec![8.0]);
}

#[test]
fn pipeline_runs_on_worker_threads() {
    let source = PIPELINE.replace(
        "functions = [\"B\", \"A\"]",
        "functions = [\"B\", \"A\"]\ncycle_time_us = 500",
    );
    let mut app = configure(&source);
    app.prepare_next_state("Run").unwrap();
    app.start_execution().unwrap();

    let d2 = app.data_source("D2").unwrap().clone();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while read_values::<f64>(d2.as_ref(), "Y", 0).unwrap() != vec![8.0] {
        assert!(std::time::Instant::now() < deadline, "Y never reached 8.0");
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    let summaries = app.stop_execution();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].thread, "Thread1");
    assert!(summaries[0].stats.cycle_count >= 2);
    let counters = app.scheduler().thread_schedule("Run", "Thread1").unwrap().counters();
    assert_eq!(counters.errors, 0);
    assert!(counters.cycles >= 2);
}

const ROUTING: &str = r#"
[application]
name = "Routing"

[[data_sources]]
name = "Shm"
class = "SharedMemoryDataSource"
[[data_sources.signals]]
name = "V"
type = "uint32"
number_of_elements = 4
default = [10, 20, 30, 40]
[[data_sources.signals]]
name = "S"
type = "float32"
number_of_samples = 3
default = 0.5

[[functions]]
name = "Slice"
class = "IOGAM"
[[functions.input_signals]]
name = "Middle"
alias = "V"
data_source = "Shm"
ranges = [[1, 2]]
[[functions.output_signals]]
name = "W"
data_source = "Shm"
type = "uint32"
number_of_elements = 2

[[functions]]
name = "Burst"
class = "IOGAM"
[[functions.input_signals]]
name = "S"
data_source = "Shm"
number_of_samples = 3
[[functions.output_signals]]
name = "Flat"
data_source = "Shm"
type = "float32"
number_of_elements = 3

[[states]]
name = "Route"
[[states.threads]]
name = "T"
functions = ["Slice", "Burst"]
"#;

#[test]
fn ranged_and_sampled_signals_are_routed() {
    let mut app = configure(ROUTING);
    app.prepare_next_state("Route").unwrap();
    let report = app.execute_single_cycle("T").unwrap();
    assert!(report.is_ok(), "{:?}", report.error);

    let shm = app.data_source("Shm").unwrap();
    assert_eq!(read_values::<u32>(shm.as_ref(), "W", 0).unwrap(), vec![20, 30]);
    assert_eq!(read_values::<f32>(shm.as_ref(), "Flat", 0).unwrap(), vec![0.5; 3]);

    let slice = app.scheduler().thread_schedule("Route", "T").unwrap().executables();
    assert_eq!(slice[0].gam_name(), "Slice");
    assert_eq!(slice[0].inputs()[0].kind(), cadence_core::BrokerKind::Ranged);
    assert_eq!(slice[1].inputs()[0].kind(), cadence_core::BrokerKind::Sampled);
}
