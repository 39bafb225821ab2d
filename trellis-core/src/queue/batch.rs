//! Adaptive batch sizing.
//!
//! After every batch the measured wall-clock time joins a short rolling
//! history. If the average exceeds the frame budget the batch shrinks
//! (divide by the factor, floor); below half the budget it grows (multiply,
//! ceil). The size always stays within `[min, max]`.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::QueueConfig;

#[derive(Debug, Clone)]
pub struct BatchController {
    size: usize,
    min: usize,
    max: usize,
    budget: Duration,
    factor: f64,
    history: VecDeque<Duration>,
    history_len: usize,
}

impl BatchController {
    pub fn new(config: &QueueConfig) -> Self {
        let min = config.min_batch.max(1);
        let max = config.max_batch.max(min);
        Self {
            size: config.initial_batch.clamp(min, max),
            min,
            max,
            budget: config.frame_budget(),
            factor: config.adjustment_factor,
            history: VecDeque::with_capacity(config.history_len),
            history_len: config.history_len.max(1),
        }
    }

    /// Current batch size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Rolling average of the recorded batch times.
    pub fn average(&self) -> Option<Duration> {
        if self.history.is_empty() {
            return None;
        }
        let total: Duration = self.history.iter().sum();
        Some(total / self.history.len() as u32)
    }

    /// Feed one batch's execution time and adjust the size.
    pub fn record(&mut self, elapsed: Duration) {
        self.history.push_back(elapsed);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }

        let Some(average) = self.average() else {
            return;
        };
        let size = self.size as f64;
        let next = if average > self.budget {
            (size / self.factor).floor()
        } else if average < self.budget / 2 {
            (size * self.factor).ceil()
        } else {
            size
        };
        self.size = (next as usize).clamp(self.min, self.max);
    }
}
