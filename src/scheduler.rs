use crate::config::Config;
use rand::Rng;

/// Gates periodic work inside the daemon loop. Fee optimization runs every
/// tick; rebalancing runs on a coarser interval with a probabilistic
/// trigger so the node does not hammer the network on a fixed beat.
pub struct Scheduler {
    tick_count: u64,
    rebalance_interval: u64,
    trigger_probability: f64,
    force_all: bool,
}

impl Scheduler {
    pub fn new(config: &Config) -> Self {
        // Ticks default to 10-minute intervals; rebalancing is considered
        // roughly every 2 hours.
        Self {
            tick_count: 0,
            rebalance_interval: 12,
            trigger_probability: config.rebalance.trigger_probability,
            force_all: false,
        }
    }

    /// Create a scheduler that forces all modules to run (for run-once mode).
    pub fn new_force_all(config: &Config) -> Self {
        let mut s = Self::new(config);
        s.force_all = true;
        s
    }

    pub fn tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn should_run_fees(&self) -> bool {
        true
    }

    pub fn should_run_rebalancer(&self) -> bool {
        if self.force_all {
            return true;
        }
        if self.tick_count % self.rebalance_interval != 0 {
            return false;
        }
        let mut rng = rand::thread_rng();
        rng.gen::<f64>() < self.trigger_probability
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config() -> Config {
        Config::test_default(std::path::PathBuf::from("/dev/null"))
    }

    #[test]
    fn test_tick_increments() {
        let config = test_config();
        let mut sched = Scheduler::new(&config);
        assert_eq!(sched.tick_count(), 0);
        sched.tick();
        assert_eq!(sched.tick_count(), 1);
    }

    #[test]
    fn test_fees_run_every_tick() {
        let config = test_config();
        let mut sched = Scheduler::new(&config);
        for _ in 0..5 {
            assert!(sched.should_run_fees());
            sched.tick();
        }
    }

    #[test]
    fn test_rebalancer_interval_gating() {
        let config = test_config();
        let mut sched = Scheduler::new(&config);
        // At tick 1, rebalancer never runs (1 % 12 != 0), regardless of the
        // probability roll.
        sched.tick();
        assert!(!sched.should_run_rebalancer());
    }

    #[test]
    fn test_rebalancer_certain_trigger_on_interval() {
        let mut config = test_config();
        config.rebalance.trigger_probability = 1.0;
        let sched = Scheduler::new(&config);
        // Tick 0 is on the interval and probability 1 always fires.
        assert!(sched.should_run_rebalancer());
    }

    #[test]
    fn test_rebalancer_zero_probability_never_triggers() {
        let mut config = test_config();
        config.rebalance.trigger_probability = 0.0;
        let sched = Scheduler::new(&config);
        assert!(!sched.should_run_rebalancer());
    }

    #[test]
    fn test_force_all_always_runs() {
        let config = test_config();
        let mut sched = Scheduler::new_force_all(&config);
        assert!(sched.should_run_fees());
        assert!(sched.should_run_rebalancer());
        sched.tick();
        assert!(sched.should_run_rebalancer());
    }
}
