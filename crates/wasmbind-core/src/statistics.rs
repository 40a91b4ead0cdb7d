//! Execution statistics.
//!
//! Instruction counts and cost are both measured in engine fuel. A VM only
//! meters fuel when instruction counting, cost measuring, or a cost limit is
//! configured; otherwise those counters stay at zero.

use std::time::Duration;

use wasmbind_common::StatisticsConfig;

/// Statistics sink owned by a [`Vm`](crate::Vm).
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    config: StatisticsConfig,
    instr_count: u64,
    total_cost: u64,
    total_time: Duration,
    consumed: u64,
    cost_limit: Option<u64>,
}

impl Statistics {
    /// Create an empty sink.
    pub fn new(config: StatisticsConfig, cost_limit: Option<u64>) -> Self {
        Self {
            config,
            cost_limit,
            ..Default::default()
        }
    }

    /// Instructions executed, approximated by fuel.
    pub fn instr_count(&self) -> u64 {
        self.instr_count
    }

    /// Cumulative execution cost.
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    /// Wall-clock time spent executing guest code.
    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Instructions per second over the measured time, or zero if nothing
    /// was measured.
    #[allow(clippy::cast_precision_loss)]
    pub fn instr_per_second(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            self.instr_count as f64 / secs
        } else {
            0.0
        }
    }

    /// The cumulative cost budget, if any.
    pub fn cost_limit(&self) -> Option<u64> {
        self.cost_limit
    }

    /// Set or remove the cumulative cost budget.
    ///
    /// Only enforced when the VM's engine meters fuel.
    pub fn set_cost_limit(&mut self, limit: Option<u64>) {
        self.cost_limit = limit;
    }

    /// Reset every counter, including fuel charged against the cost limit.
    /// The limit itself is kept.
    pub fn clear(&mut self) {
        self.consumed = 0;
        self.instr_count = 0;
        self.total_cost = 0;
        self.total_time = Duration::ZERO;
    }

    /// Fuel consumed by every recorded call, measured or not.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Fuel available to the next call.
    pub(crate) fn remaining_budget(&self) -> u64 {
        self.cost_limit
            .map_or(u64::MAX, |limit| limit.saturating_sub(self.consumed))
    }

    /// Charge fuel spent instantiating a module against the cost limit.
    ///
    /// Instantiation is not execution: counters and time are left alone.
    pub(crate) fn record_instantiation(&mut self, fuel: u64) {
        self.consumed = self.consumed.saturating_add(fuel);
    }

    /// Record one call.
    pub(crate) fn record(&mut self, fuel: u64, elapsed: Duration) {
        if self.config.instruction_counting {
            self.instr_count = self.instr_count.saturating_add(fuel);
        }
        // The budget is tracked even when cost is not reported
        self.consumed = self.consumed.saturating_add(fuel);
        if self.config.cost_measuring {
            self.total_cost = self.total_cost.saturating_add(fuel);
        }
        if self.config.time_measuring {
            self.total_time += elapsed;
        }
    }
}
