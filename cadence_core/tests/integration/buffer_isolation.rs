//! A transition only ever writes the inactive buffer: an observer of the
//! active buffer never sees values prepared for the next state, sees all
//! of them once the index flips, and no cycle of an earlier state lands in
//! a buffer prepared later.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use cadence_core::datasource::read_values;
use cadence_core::{ApplicationStatus, TransitionError, WorkerExit};

use super::{configure_with, test_registries};

const APP: &str = r#"
[application]
name = "Isolation"

[[data_sources]]
name = "D"
class = "GAMDataSource"
[[data_sources.signals]]
name = "K"
type = "uint32"
default = 99

[[functions]]
name = "Count"
class = "Counter"
[[functions.output_signals]]
name = "C"
data_source = "D"
type = "uint32"

[[functions]]
name = "Const"
class = "ConstantGAM"
[[functions.output_signals]]
name = "K"
data_source = "D"

[[functions]]
name = "Gate"
class = "Picky"
[functions.parameters]
refuse = "Next"

[[states]]
name = "Count"
[[states.threads]]
name = "T"
functions = ["Count"]
cycle_time_us = 200

[[states]]
name = "Next"
[[states.threads]]
name = "T"
functions = ["Const", "Gate"]
"#;

#[test]
fn refused_preparation_touches_inactive_buffer_only() {
    let mut app = configure_with(APP, &test_registries());
    app.prepare_next_state("Count").unwrap();
    for _ in 0..5 {
        app.execute_single_cycle("T").unwrap();
    }
    let active = app.buffer_index();
    let d = Arc::clone(app.data_source("D").unwrap());
    assert_eq!(read_values::<u32>(d.as_ref(), "C", active).unwrap(), vec![5]);
    assert_eq!(read_values::<u32>(d.as_ref(), "K", active).unwrap(), vec![0]);

    assert!(matches!(app.prepare_next_state("Next"), Err(TransitionError::Gam { .. })));

    // The data source prepared K for "Next" in the inactive buffer...
    assert_eq!(read_values::<u32>(d.as_ref(), "K", 1 - active).unwrap(), vec![99]);
    // ...while the active image is exactly as the running state left it.
    assert_eq!(app.buffer_index(), active);
    assert_eq!(read_values::<u32>(d.as_ref(), "K", active).unwrap(), vec![0]);
    assert_eq!(read_values::<u32>(d.as_ref(), "C", active).unwrap(), vec![5]);

    app.execute_single_cycle("T").unwrap();
    assert_eq!(read_values::<u32>(d.as_ref(), "C", active).unwrap(), vec![6]);
}

#[test]
fn concurrent_observer_never_sees_prepared_values() {
    let mut app = configure_with(APP, &test_registries());
    app.prepare_next_state("Count").unwrap();
    app.start_execution().unwrap();

    let index = app.buffer_index_handle();
    let d = Arc::clone(app.data_source("D").unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0u64;
            let mut max_c = 0u32;
            while !done.load(Ordering::Acquire) {
                let b = index.load();
                let k = read_values::<u32>(d.as_ref(), "K", b).unwrap()[0];
                let c = read_values::<u32>(d.as_ref(), "C", b).unwrap()[0];
                assert_eq!(k, 0, "prepared value leaked into the active buffer");
                max_c = max_c.max(c);
                reads += 1;
            }
            (reads, max_c)
        })
    };

    let until = Instant::now() + Duration::from_millis(30);
    while Instant::now() < until {
        assert!(app.prepare_next_state("Next").is_err());
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(app.status(), &ApplicationStatus::StateActive("Count".into()));

    done.store(true, Ordering::Release);
    let (reads, max_c) = observer.join().unwrap();
    let summaries = app.stop_execution();
    assert!(reads > 0);
    assert!(max_c > 0);
    assert_eq!(summaries.len(), 1);
}

const FLIP: &str = r#"
[application]
name = "Flip"

[[data_sources]]
name = "D"
class = "GAMDataSource"
[[data_sources.signals]]
name = "K"
type = "uint32"
default = 99
[[data_sources.signals]]
name = "L"
type = "float64"
number_of_elements = 2
default = [1.5, 2.5]

[[functions]]
name = "Count"
class = "Counter"
[[functions.output_signals]]
name = "C"
data_source = "D"
type = "uint32"

[[functions]]
name = "Const"
class = "ConstantGAM"
[[functions.output_signals]]
name = "K"
data_source = "D"

[[functions]]
name = "Pair"
class = "ConstantGAM"
[[functions.output_signals]]
name = "L"
data_source = "D"

[[states]]
name = "Count"
[[states.threads]]
name = "T"
functions = ["Count"]
cycle_time_us = 200

[[states]]
name = "Next"
[[states.threads]]
name = "T"
functions = ["Const", "Pair"]
"#;

#[test]
fn concurrent_observer_sees_whole_image_across_flip() {
    let mut app = configure_with(FLIP, &test_registries());
    app.prepare_next_state("Count").unwrap();
    app.start_execution().unwrap();
    let old = app.buffer_index();

    let index = app.buffer_index_handle();
    let d = Arc::clone(app.data_source("D").unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let (mut before, mut after) = (0u64, 0u64);
            let mut wrong = Vec::new();
            while !done.load(Ordering::Acquire) {
                let b = index.load();
                let k = read_values::<u32>(d.as_ref(), "K", b).unwrap()[0];
                let l = read_values::<f64>(d.as_ref(), "L", b).unwrap();
                if b == old {
                    before += 1;
                    if k != 0 || l != [0.0, 0.0] {
                        wrong.push((b, k, l));
                    }
                } else {
                    after += 1;
                    if k != 99 || l != [1.5, 2.5] {
                        wrong.push((b, k, l));
                    }
                }
            }
            (before, after, wrong)
        })
    };

    thread::sleep(Duration::from_millis(20));
    app.prepare_next_state("Next").unwrap();
    assert_eq!(app.buffer_index(), 1 - old);
    thread::sleep(Duration::from_millis(20));

    done.store(true, Ordering::Release);
    let (before, after, wrong) = observer.join().unwrap();
    assert!(before > 0);
    assert!(after > 0);
    assert!(wrong.is_empty(), "inconsistent images: {wrong:?}");

    let summaries = app.stop_execution();
    assert!(summaries.iter().all(|w| w.exit == WorkerExit::Superseded));
}

const LATE_WRITER: &str = r#"
[application]
name = "LateWriter"

[[data_sources]]
name = "D"
class = "GAMDataSource"
[[data_sources.signals]]
name = "V"
type = "uint32"
default = 7

[[functions]]
name = "Slow"
class = "Sleeper"
[functions.parameters]
sleep_ms = 200
value = 111
[[functions.output_signals]]
name = "V"
data_source = "D"

[[functions]]
name = "Tick"
class = "Counter"
[[functions.output_signals]]
name = "C"
data_source = "D"
type = "uint32"

[[functions]]
name = "Copy"
class = "IOGAM"
[[functions.input_signals]]
name = "V"
data_source = "D"
[[functions.output_signals]]
name = "W"
data_source = "D"
type = "uint32"

[[states]]
name = "S1"
[[states.threads]]
name = "T"
functions = ["Slow"]
cycle_time_us = 1000

[[states]]
name = "S2"
[[states.threads]]
name = "T"
functions = ["Tick"]

[[states]]
name = "S3"
[[states.threads]]
name = "T"
functions = ["Copy"]
"#;

#[test]
fn superseded_cycle_never_lands_in_a_later_state() {
    let mut app = configure_with(LATE_WRITER, &test_registries());
    app.prepare_next_state("S1").unwrap();
    app.start_execution().unwrap();
    thread::sleep(Duration::from_millis(50));

    // S1's worker is still inside its first cycle on the buffer S3 reuses.
    app.prepare_next_state("S2").unwrap();
    app.prepare_next_state("S3").unwrap();
    let active = app.buffer_index();
    let d = Arc::clone(app.data_source("D").unwrap());
    assert_eq!(read_values::<u32>(d.as_ref(), "V", active).unwrap(), vec![7]);

    thread::sleep(Duration::from_millis(400));
    assert_eq!(read_values::<u32>(d.as_ref(), "V", active).unwrap(), vec![7]);

    app.execute_single_cycle("T").unwrap();
    assert_eq!(read_values::<u32>(d.as_ref(), "W", active).unwrap(), vec![7]);
    let summaries = app.stop_execution();
    assert!(
        summaries
            .iter()
            .any(|w| w.state == "S1" && w.exit == WorkerExit::Superseded)
    );
}
