mod buffer_isolation;
mod config_loading;
mod layout;
mod scenario;
mod scheduler_count;
mod transitions;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cadence_core::config::load_config_from_str;
use cadence_core::gam::{Gam, GamError, GamHooks, GamMemory, GamSignals};
use cadence_core::{RealTimeApplication, Registries};

/// Configure an application with the given registries.
pub fn configure_with(source: &str, registries: &Registries) -> RealTimeApplication {
    let config = load_config_from_str(source).expect("config parses");
    RealTimeApplication::configure(&config, registries).expect("application configures")
}

/// Configure an application with the built-in registries.
pub fn configure(source: &str) -> RealTimeApplication {
    configure_with(source, &Registries::default())
}

// ── Test GAMs ───────────────────────────────────────────────────────

/// Writes 1, 2, 3, … into its single uint32 output.
#[derive(Default)]
pub struct Counter {
    count: u32,
}

impl Gam for Counter {
    fn setup(&mut self, signals: &GamSignals<'_>) -> Result<(), GamError> {
        signals.require_counts(0, 1)
    }

    fn execute(&mut self, memory: &mut GamMemory) -> Result<(), GamError> {
        self.count += 1;
        memory.set_output::<u32>(0, 0, self.count)
    }
}

/// No signals; refuses to enter any state listed in `refuse`.
pub struct Picky {
    pub refuse: Arc<[String]>,
}

struct Refusals(Arc<[String]>);

impl GamHooks for Refusals {
    fn prepare_next_state(&self, _current: Option<&str>, next: &str) -> Result<(), GamError> {
        if self.0.iter().any(|s| s == next) {
            return Err(GamError::StateRejected(next.to_string()));
        }
        Ok(())
    }
}

impl Gam for Picky {
    fn setup(&mut self, _signals: &GamSignals<'_>) -> Result<(), GamError> {
        Ok(())
    }

    fn execute(&mut self, _memory: &mut GamMemory) -> Result<(), GamError> {
        Ok(())
    }

    fn hooks(&self) -> Option<Arc<dyn GamHooks>> {
        Some(Arc::new(Refusals(Arc::clone(&self.refuse))))
    }
}

/// Sleeps `sleep_ms` in every cycle, then writes `value` to its single
/// uint32 output.
pub struct Sleeper {
    sleep: Duration,
    value: u32,
}

impl Gam for Sleeper {
    fn setup(&mut self, signals: &GamSignals<'_>) -> Result<(), GamError> {
        signals.require_counts(0, 1)
    }

    fn execute(&mut self, memory: &mut GamMemory) -> Result<(), GamError> {
        thread::sleep(self.sleep);
        memory.set_output::<u32>(0, 0, self.value)
    }
}

/// No signals; its transition hook takes `hook_ms` to return.
pub struct Lazy {
    hook: Duration,
}

struct LazyHooks(Duration);

impl GamHooks for LazyHooks {
    fn prepare_next_state(&self, _current: Option<&str>, _next: &str) -> Result<(), GamError> {
        thread::sleep(self.0);
        Ok(())
    }
}

impl Gam for Lazy {
    fn setup(&mut self, _signals: &GamSignals<'_>) -> Result<(), GamError> {
        Ok(())
    }

    fn execute(&mut self, _memory: &mut GamMemory) -> Result<(), GamError> {
        Ok(())
    }

    fn hooks(&self) -> Option<Arc<dyn GamHooks>> {
        Some(Arc::new(LazyHooks(self.hook)))
    }
}

fn millis(ms: f64) -> Duration {
    Duration::from_micros((ms * 1000.0) as u64)
}

/// Built-in registries plus the test GAMs: `Counter`, `Picky` (refusing
/// the states named by its `refuse` parameter, comma separated), `Sleeper`
/// and `Lazy`.
pub fn test_registries() -> Registries {
    let mut r = Registries::default();
    r.gams
        .register("Counter", |_, _| Ok(Box::new(Counter::default()) as Box<dyn Gam>));
    r.gams.register("Picky", |_, params| {
        let refuse: Vec<String> = params
            .opt_str("refuse")?
            .map(|s| s.split(',').map(|x| x.trim().to_string()).collect())
            .unwrap_or_default();
        Ok(Box::new(Picky {
            refuse: Arc::from(refuse),
        }) as Box<dyn Gam>)
    });
    r.gams.register("Sleeper", |_, params| {
        Ok(Box::new(Sleeper {
            sleep: millis(params.get_f64_or("sleep_ms", 0.0)?),
            value: params.get_f64_or("value", 0.0)? as u32,
        }) as Box<dyn Gam>)
    });
    r.gams.register("Lazy", |_, params| {
        Ok(Box::new(Lazy {
            hook: millis(params.get_f64_or("hook_ms", 0.0)?),
        }) as Box<dyn Gam>)
    });
    r
}
