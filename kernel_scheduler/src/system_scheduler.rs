use crate::error::{SchedulerError, SchedulerResult};
use crate::system::{Phase, ProfileWindow, System, PHASES};
use fxhash::FxHashMap;
use kernel_core::view::View;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::trace;

struct Entry {
    system: Box<dyn System>,
    profile: ProfileWindow,
    child_profiles: Vec<ProfileWindow>,
}

/// Holds every registered system, grouped by phase and topologically
/// sorted within each phase by `UpdateAfter`/`UpdateBefore` edges
/// (§4.11). Cross-phase edges are ignored: phase order is the fixed
/// declaration order of `Phase`.
pub struct SystemScheduler {
    phases: FxHashMap<Phase, Vec<Entry>>,
}

impl SystemScheduler {
    pub fn new() -> Self {
        SystemScheduler {
            phases: FxHashMap::default(),
        }
    }

    /// Registers a system and places it at the end of its phase's
    /// current order; `compile` resolves the final order from the
    /// declared edges.
    pub fn register(&mut self, system: Box<dyn System>) {
        let phase = system.phase();
        let child_profiles = vec![ProfileWindow::new(); system.children().len()];
        self.phases.entry(phase).or_insert_with(Vec::new).push(Entry {
            system,
            profile: ProfileWindow::new(),
            child_profiles,
        });
    }

    /// Topologically sorts every phase via Kahn's algorithm. Must be
    /// called once after all systems are registered and before the
    /// first `execute`; a cycle within a phase is a fatal
    /// `CircularDependency` at construction time.
    pub fn compile(&mut self) -> SchedulerResult<()> {
        for entries in self.phases.values_mut() {
            let order = topological_order(entries)?;
            let mut slots: Vec<Option<Entry>> = entries.drain(..).map(Some).collect();
            for i in order {
                entries.push(slots[i].take().expect("each index appears exactly once"));
            }
        }
        Ok(())
    }

    /// Executes every phase in fixed numerical order, each phase's
    /// systems in topologically sorted order, recording wall-clock
    /// time into each system's (and each group child's) profile.
    pub fn execute(&mut self, view: &View, dt: f64) {
        for phase in PHASES.iter() {
            let entries = match self.phases.get_mut(phase) {
                Some(entries) => entries,
                None => continue,
            };
            for entry in entries.iter_mut() {
                let start = Instant::now();
                entry.system.run(view, dt);
                let group_elapsed = start.elapsed();
                entry.profile.record(group_elapsed);
                trace!(system = entry.system.name(), ?group_elapsed, "system executed");

                for (child, child_profile) in entry.system.children().iter().zip(entry.child_profiles.iter_mut()) {
                    let child_start = Instant::now();
                    child.run(view, dt);
                    child_profile.record(child_start.elapsed());
                }
            }
        }
    }

    pub fn profile(&self, phase: Phase, name: &str) -> Option<&ProfileWindow> {
        self.phases
            .get(&phase)?
            .iter()
            .find(|e| e.system.name() == name)
            .map(|e| &e.profile)
    }
}

impl Default for SystemScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Kahn's algorithm over one phase's `update_after`/`update_before`
/// edges. Returns the indices of `entries` in a valid topological
/// order, or `CircularDependency` if a cycle remains once every
/// zero-indegree node has been consumed.
fn topological_order(entries: &[Entry]) -> SchedulerResult<Vec<usize>> {
    let index_of: FxHashMap<&'static str, usize> =
        entries.iter().enumerate().map(|(i, e)| (e.system.name(), i)).collect();

    let mut indegree = vec![0usize; entries.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];

    for (i, entry) in entries.iter().enumerate() {
        for after in entry.system.update_after() {
            if let Some(&j) = index_of.get(after) {
                adjacency[j].push(i);
                indegree[i] += 1;
            }
        }
        for before in entry.system.update_before() {
            if let Some(&j) = index_of.get(before) {
                adjacency[i].push(j);
                indegree[j] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..entries.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(entries.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &adjacency[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != entries.len() {
        let members = entries
            .iter()
            .enumerate()
            .filter(|(i, _)| !order.contains(i))
            .map(|(_, e)| e.system.name())
            .collect();
        let phase_name = entries
            .first()
            .map(|e| phase_label(e.system.phase()))
            .unwrap_or("unknown");
        return Err(SchedulerError::CircularDependency {
            phase: phase_name,
            members,
        });
    }

    Ok(order)
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Input => "Input",
        Phase::BeforeSync => "BeforeSync",
        Phase::Simulation => "Simulation",
        Phase::PostSimulation => "PostSimulation",
        Phase::Export => "Export",
    }
}
