use kernel_core::view::View;
use std::collections::VecDeque;
use std::time::Duration;

/// Ordinal bucket a system belongs to. Execution order per tick is the
/// fixed numerical order of this enum; cross-phase `UpdateAfter`/
/// `UpdateBefore` edges are ignored (see `SystemScheduler::compile`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Input,
    BeforeSync,
    Simulation,
    PostSimulation,
    Export,
}

pub const PHASES: [Phase; 5] = [
    Phase::Input,
    Phase::BeforeSync,
    Phase::Simulation,
    Phase::PostSimulation,
    Phase::Export,
];

/// Stateless unit of work scheduled inside one tick. `update_after`/
/// `update_before` name other systems *in the same phase*; edges
/// crossing a phase boundary are meaningless and ignored.
pub trait System: Send + Sync {
    fn name(&self) -> &'static str;
    fn phase(&self) -> Phase;
    fn update_after(&self) -> &[&'static str] {
        &[]
    }
    fn update_before(&self) -> &[&'static str] {
        &[]
    }
    fn run(&self, view: &View, dt: f64);

    /// Children of a system group, executed in this declared order
    /// (not topologically sorted) and profiled individually as well
    /// as under the group's own name. Leaf systems return an empty
    /// slice.
    fn children(&self) -> &[Box<dyn System>] {
        &[]
    }
}

/// Rolling performance profile for one system: the last 60 execution
/// durations plus lifetime min/max/avg, per §4.11.
#[derive(Debug, Clone)]
pub struct ProfileWindow {
    window: VecDeque<Duration>,
    capacity: usize,
    lifetime_count: u64,
    lifetime_total: Duration,
    lifetime_min: Option<Duration>,
    lifetime_max: Option<Duration>,
}

impl ProfileWindow {
    pub fn new() -> Self {
        ProfileWindow {
            window: VecDeque::with_capacity(60),
            capacity: 60,
            lifetime_count: 0,
            lifetime_total: Duration::from_secs(0),
            lifetime_min: None,
            lifetime_max: None,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);
        self.lifetime_count += 1;
        self.lifetime_total += elapsed;
        self.lifetime_min = Some(self.lifetime_min.map_or(elapsed, |m| m.min(elapsed)));
        self.lifetime_max = Some(self.lifetime_max.map_or(elapsed, |m| m.max(elapsed)));
    }

    pub fn window_avg(&self) -> Option<Duration> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().sum::<Duration>() / self.window.len() as u32)
    }

    pub fn lifetime_avg(&self) -> Option<Duration> {
        if self.lifetime_count == 0 {
            return None;
        }
        Some(self.lifetime_total / self.lifetime_count as u32)
    }

    pub fn lifetime_min(&self) -> Option<Duration> {
        self.lifetime_min
    }

    pub fn lifetime_max(&self) -> Option<Duration> {
        self.lifetime_max
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

impl Default for ProfileWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_caps_at_60_entries() {
        let mut profile = ProfileWindow::new();
        for i in 0..100 {
            profile.record(Duration::from_micros(i));
        }
        assert_eq!(profile.window_len(), 60);
        assert_eq!(profile.lifetime_min(), Some(Duration::from_micros(0)));
        assert_eq!(profile.lifetime_max(), Some(Duration::from_micros(99)));
    }

    #[test]
    fn lifetime_avg_covers_every_recorded_sample() {
        let mut profile = ProfileWindow::new();
        profile.record(Duration::from_millis(10));
        profile.record(Duration::from_millis(20));
        assert_eq!(profile.lifetime_avg(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn phases_run_in_fixed_declaration_order() {
        assert!(Phase::Input < Phase::BeforeSync);
        assert!(Phase::BeforeSync < Phase::Simulation);
        assert!(Phase::Simulation < Phase::PostSimulation);
        assert!(Phase::PostSimulation < Phase::Export);
    }
}
