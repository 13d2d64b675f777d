//! Application files on disk, and configurations rejected before anything
//! runs.

use std::io::Write;

use cadence_common::config::ConfigError;
use cadence_core::config::{load_config, load_config_from_str};
use cadence_core::{ApplicationStatus, ConfigurationError, RealTimeApplication, Registries};
use tempfile::NamedTempFile;

const BASE: &str = r#"
[shared]
log_level = "debug"
service_name = "loader-test"

[application]
name = "FromDisk"
initial_state = "Run"

[scheduler]
error_policy = "continue"

[[data_sources]]
name = "D"
class = "GAMDataSource"

[[functions]]
name = "Src"
class = "ConstantGAM"
[[functions.output_signals]]
name = "X"
data_source = "D"
type = "int32"
default = -7

[[functions]]
name = "Copy"
class = "IOGAM"
[[functions.input_signals]]
name = "X"
data_source = "D"
[[functions.output_signals]]
name = "Z"
data_source = "D"
type = "int32"

[[states]]
name = "Run"
[[states.threads]]
name = "T1"
functions = ["Src", "Copy"]
"#;

fn try_configure(source: &str) -> Result<RealTimeApplication, ConfigurationError> {
    let config = load_config_from_str(source)?;
    RealTimeApplication::configure(&config, &Registries::default())
}

#[test]
fn configures_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(BASE.as_bytes()).unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.shared.service_name, "loader-test");
    assert_eq!(config.application.initial_state.as_deref(), Some("Run"));

    let app = RealTimeApplication::configure(&config, &Registries::default()).unwrap();
    assert_eq!(app.name(), "FromDisk");
    assert_eq!(app.status(), &ApplicationStatus::Configured);
    assert_eq!(app.scheduler().policy(), cadence_core::ErrorPolicy::Continue);
    assert_eq!(app.number_of_executables("Run", "T1").unwrap(), 2);
}

#[test]
fn missing_file_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn malformed_toml_reported() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[application\nname = ").unwrap();
    assert!(matches!(load_config(file.path()), Err(ConfigError::ParseError(_))));
}

#[test]
fn unknown_gam_class_rejected() {
    let source = BASE.replace("class = \"IOGAM\"", "class = \"NoSuchGAM\"");
    assert!(matches!(try_configure(&source), Err(ConfigurationError::Gam { gam, .. }) if gam == "Copy"));
}

#[test]
fn unknown_data_source_rejected() {
    let source = BASE.replace(
        "name = \"Z\"\ndata_source = \"D\"",
        "name = \"Z\"\ndata_source = \"Nowhere\"",
    );
    assert!(matches!(
        try_configure(&source),
        Err(ConfigurationError::UnknownReference { kind: "data source", .. })
    ));
}

#[test]
fn type_disagreement_rejected() {
    let source = BASE.replace(
        "name = \"X\"\ndata_source = \"D\"\n[[functions.output_signals]]",
        "name = \"X\"\ndata_source = \"D\"\ntype = \"float32\"\n[[functions.output_signals]]",
    );
    assert!(matches!(
        try_configure(&source),
        Err(ConfigurationError::SignalMismatch { gam, .. }) if gam == "Copy"
    ));
}

#[test]
fn second_producer_rejected() {
    // Copy now writes X as well.
    let source = BASE.replace("name = \"Z\"", "name = \"X\"");
    let err = try_configure(&source).unwrap_err();
    let ConfigurationError::ProducerConflict { state, signal, first, second, .. } = err else {
        panic!("expected a producer conflict, got {err}");
    };
    assert_eq!(state, "Run");
    assert_eq!(signal, "X");
    assert_eq!((first.as_str(), second.as_str()), ("Src", "Copy"));
}

#[test]
fn cross_thread_signal_rejected() {
    let source = BASE.replace(
        "functions = [\"Src\", \"Copy\"]",
        "functions = [\"Src\"]\n[[states.threads]]\nname = \"T2\"\nfunctions = [\"Copy\"]",
    );
    let err = try_configure(&source).unwrap_err();
    let ConfigurationError::CrossThreadSignal { producer, consumer, .. } = err else {
        panic!("expected a cross-thread signal, got {err}");
    };
    assert_eq!(producer, "T1");
    assert_eq!(consumer, "T2");
}

#[test]
fn gam_in_two_groups_rejected() {
    let source = format!(
        "{BASE}\n[[groups]]\nname = \"G1\"\nclass = \"ParameterGroup\"\nfunctions = [\"Copy\"]\n\
         [[groups]]\nname = \"G2\"\nclass = \"ParameterGroup\"\nfunctions = [\"Copy\"]\n"
    );
    assert!(matches!(
        try_configure(&source),
        Err(ConfigurationError::Duplicate { kind: "group member", .. })
    ));
}

#[test]
fn unknown_function_in_thread_rejected() {
    let source = BASE.replace("[\"Src\", \"Copy\"]", "[\"Src\", \"Ghost\"]");
    assert!(try_configure(&source).is_err());
}

#[test]
fn demo_application_runs() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/app.toml");
    let config = load_config(&path).unwrap();
    assert_eq!(config.shared.service_name, "cadence-demo");

    let mut app = RealTimeApplication::configure(&config, &Registries::default()).unwrap();
    let initial = app.initial_state().unwrap().to_string();
    app.prepare_next_state(&initial).unwrap();
    assert!(app.execute_single_cycle("Control").unwrap().is_ok());

    let out = app.data_source("Out").unwrap();
    assert_eq!(
        cadence_core::datasource::read_values::<f64>(out.as_ref(), "Scaled", 0).unwrap(),
        vec![2.5, 5.0, 7.5, 10.0]
    );

    app.prepare_next_state("Idle").unwrap();
    app.prepare_next_state("Run").unwrap();
    assert_eq!(app.status(), &ApplicationStatus::StateActive("Run".to_string()));
}
