use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::error::SchedulerError;
use crate::module::Module;
use crate::policy::{Mode, Strategy};
use crossbeam_channel::{Receiver, Sender};
use fxhash::FxHashMap;
use kernel_core::repository::Repository;
use kernel_core::snapshot::{GdbProvider, SharedProvider, SnapshotProvider, SodProvider};
use kernel_core::view::View;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

/// Message sent from a worker thread back to the main thread once a
/// `FrameSynced`/`Asynchronous` module's `tick` returns, grounded in
/// `tonks`'s `TaskMessage` completion channel.
struct Completion {
    module_index: usize,
    tick: u64,
    elapsed: Duration,
    outcome: Result<(), String>,
}

struct ModuleEntry {
    module: Arc<dyn Module>,
    breaker: CircuitBreaker,
    last_ran_tick: Option<u64>,
    in_flight: Arc<AtomicBool>,
}

/// Dispatches every registered module once per simulation tick,
/// matching its policy's mode/strategy (§4.10). Owns the three
/// snapshot providers and a `rayon` thread pool for background
/// dispatch.
pub struct ModuleScheduler {
    entries: Vec<ModuleEntry>,
    gdb: Arc<GdbProvider>,
    sod: Arc<SodProvider>,
    shared: Arc<SharedProvider>,
    pool: rayon::ThreadPool,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    sim_hz: u32,
}

impl ModuleScheduler {
    pub fn new(
        gdb: Arc<GdbProvider>,
        sod: Arc<SodProvider>,
        shared: Arc<SharedProvider>,
        worker_threads: usize,
        sim_hz: u32,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("module-host-worker-{}", i))
            .build()
            .expect("rayon thread pool construction cannot fail with a valid thread count");
        let (completions_tx, completions_rx) = crossbeam_channel::unbounded();
        ModuleScheduler {
            entries: Vec::new(),
            gdb,
            sod,
            shared,
            pool,
            completions_tx,
            completions_rx,
            sim_hz,
        }
    }

    /// Registers a module, validating its policy and widening the
    /// relevant snapshot provider's declared component mask.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<(), SchedulerError> {
        let policy = module.policy();
        policy.validate(module.name())?;
        if self.entries.iter().any(|e| e.module.name() == module.name()) {
            return Err(SchedulerError::DuplicateRegistration(module.name()));
        }
        match policy.strategy {
            Strategy::Sod => self.sod.widen_mask(&module.required_components()),
            Strategy::Shared => self.shared.widen_mask(&module.required_components()),
            Strategy::Gdb | Strategy::Direct => {}
        }
        let breaker = CircuitBreaker::new(module.name(), policy.failure_threshold, policy.reset_timeout());
        self.entries.push(ModuleEntry {
            module,
            breaker,
            last_ran_tick: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        });
        Ok(())
    }

    /// Dispatches every eligible module for one tick. `live` is the
    /// authoritative repository; `Direct`-strategy (always
    /// `Synchronous`) modules read straight off it via an `Arc` clone,
    /// the other strategies go through their snapshot provider.
    pub fn dispatch_tick(&mut self, live: &Arc<Repository>, tick: u64, time: f64) {
        self.drain_completions();

        for index in 0..self.entries.len() {
            let now = Instant::now();
            let period = {
                let policy = self.entries[index].module.policy();
                policy.period_ticks(self.sim_hz)
            };
            if tick % period != 0 {
                continue;
            }
            if !self.entries[index].breaker.should_attempt(now) {
                trace!(module = self.entries[index].module.name(), "circuit open, skipping tick");
                continue;
            }
            if self.entries[index].in_flight.load(Ordering::Acquire) {
                trace!(module = self.entries[index].module.name(), "previous async dispatch still running, skipping");
                continue;
            }
            if !self.should_run_reactively(index, live) {
                continue;
            }

            let mode = self.entries[index].module.policy().mode;
            match mode {
                Mode::Synchronous => self.run_synchronous(index, live, tick, time),
                Mode::FrameSynced => self.run_frame_synced(index, live, tick, time),
                Mode::Asynchronous => self.run_asynchronous(index, live, tick, time),
            }
            self.entries[index].last_ran_tick = Some(tick);
        }
    }

    /// Reactive-skip check (§4.10): if a module declared watches and
    /// has run before, and nothing it watches changed since then,
    /// skip this tick without touching its circuit breaker.
    fn should_run_reactively(&self, index: usize, live: &Repository) -> bool {
        let entry = &self.entries[index];
        if entry.last_ran_tick.is_none() {
            return true;
        }
        let module = entry.module.as_ref();
        if module.watch_components().is_empty() && module.watch_events().is_empty() {
            return true;
        }
        let component_changed = module.watch_components().iter().any(|&id| live.any_dirty_for_component(id));
        let event_fired = module.watch_events().iter().any(|&id| live.has_pending_event(id));
        component_changed || event_fired
    }

    fn run_synchronous(&mut self, index: usize, live: &Arc<Repository>, tick: u64, time: f64) {
        let entry = &mut self.entries[index];
        let view = View::new(Arc::clone(live), live.command_buffer_handle(), tick, time);
        let start = Instant::now();
        let outcome = run_tick_guarded(entry.module.as_ref(), &view);
        record_outcome(entry, tick, start.elapsed(), outcome);
    }

    fn run_frame_synced(&mut self, index: usize, live: &Repository, tick: u64, time: f64) {
        let provider = self.provider_for(self.entries[index].module.policy().strategy);
        let view = match provider.acquire_view(live, tick, time) {
            Ok(view) => view,
            Err(err) => {
                let entry = &mut self.entries[index];
                record_outcome(entry, tick, Duration::from_secs(0), Err(err.to_string()));
                return;
            }
        };
        let module = Arc::clone(&self.entries[index].module);
        let max_runtime = module.policy().max_runtime();
        let start = Instant::now();
        let outcome = self.pool.install(|| run_tick_guarded(module.as_ref(), &view));
        let elapsed = start.elapsed();
        provider.release_view(view);

        let outcome = if elapsed > max_runtime && outcome.is_ok() {
            Err(format!("exceeded max_runtime_ms ({:?} > {:?})", elapsed, max_runtime))
        } else {
            outcome
        };
        record_outcome(&mut self.entries[index], tick, elapsed, outcome);
    }

    fn run_asynchronous(&mut self, index: usize, live: &Repository, tick: u64, time: f64) {
        let provider = self.provider_for(self.entries[index].module.policy().strategy);
        let view = match provider.acquire_view(live, tick, time) {
            Ok(view) => view,
            Err(err) => {
                record_outcome(&mut self.entries[index], tick, Duration::from_secs(0), Err(err.to_string()));
                return;
            }
        };
        let module = Arc::clone(&self.entries[index].module);
        let in_flight = Arc::clone(&self.entries[index].in_flight);
        let tx = self.completions_tx.clone();
        let provider = Arc::clone(&provider);
        in_flight.store(true, Ordering::Release);

        self.pool.spawn(move || {
            let start = Instant::now();
            let outcome = run_tick_guarded(module.as_ref(), &view);
            let elapsed = start.elapsed();
            provider.release_view(view);
            in_flight.store(false, Ordering::Release);
            let _ = tx.send(Completion {
                module_index: index,
                tick,
                elapsed,
                outcome,
            });
        });
    }

    fn provider_for(&self, strategy: Strategy) -> Arc<dyn SnapshotProvider> {
        match strategy {
            Strategy::Gdb => Arc::clone(&self.gdb) as Arc<dyn SnapshotProvider>,
            Strategy::Sod => Arc::clone(&self.sod) as Arc<dyn SnapshotProvider>,
            Strategy::Shared => Arc::clone(&self.shared) as Arc<dyn SnapshotProvider>,
            Strategy::Direct => unreachable!("Direct strategy never goes through a snapshot provider"),
        }
    }

    /// Applies every completion a worker has posted since the last
    /// dispatch to that module's circuit breaker, per §4.10's "record
    /// the task so the next dispatch can observe its completion".
    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            let max_runtime = self.entries[completion.module_index].module.policy().max_runtime();
            let outcome = if completion.elapsed > max_runtime && completion.outcome.is_ok() {
                Err(format!("exceeded max_runtime_ms ({:?} > {:?})", completion.elapsed, max_runtime))
            } else {
                completion.outcome
            };
            record_outcome(&mut self.entries[completion.module_index], completion.tick, completion.elapsed, outcome);
        }
    }

    pub fn breaker_state(&self, module_name: &str) -> Option<BreakerState> {
        self.entries.iter().find(|e| e.module.name() == module_name).map(|e| e.breaker.state())
    }
}

fn run_tick_guarded(module: &dyn Module, view: &View) -> Result<(), String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| module.tick(view, 1.0 / 60.0)));
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked with a non-string payload".to_string()
    }
}

fn record_outcome(entry: &mut ModuleEntry, tick: u64, elapsed: Duration, outcome: Result<(), String>) {
    let now = Instant::now();
    match outcome {
        Ok(()) => {
            entry.breaker.record_success();
            trace!(module = entry.module.name(), tick, ?elapsed, "module tick ok");
        }
        Err(message) => {
            entry.breaker.record_failure(now);
            warn!(module = entry.module.name(), tick, %message, "module tick failed");
            if entry.breaker.state() == BreakerState::Open {
                error!(module = entry.module.name(), "circuit breaker opened");
            }
        }
    }
}
