use courier_core::{clamp_unit, BlendPolicy, DEFAULT_GENERATION_BOUNDARY};
use log::warn;
use serde::{Deserialize, Serialize};

/// Configuration for a transfer progress controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Fraction of the visual scale reserved for local generation
    pub generation_boundary: f32,
    /// Minimum visual movement that warrants a redraw
    pub invalidate_threshold: f32,
    /// Capacity of the dispatch mailbox
    pub queue_capacity: usize,
    /// Which entities blend generation progress
    pub blend_policy: BlendPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            generation_boundary: DEFAULT_GENERATION_BOUNDARY,
            invalidate_threshold: 0.01,
            queue_capacity: 256,
            blend_policy: BlendPolicy::default(),
        }
    }
}

impl ControllerConfig {
    /// Clamp out-of-range values into something usable
    pub fn validated(mut self) -> Self {
        let boundary = clamp_unit(self.generation_boundary);
        if boundary != self.generation_boundary {
            warn!(
                "generation_boundary {} out of range, using {}",
                self.generation_boundary, boundary
            );
            self.generation_boundary = boundary;
        }

        let threshold = clamp_unit(self.invalidate_threshold);
        if threshold != self.invalidate_threshold {
            warn!(
                "invalidate_threshold {} out of range, using {}",
                self.invalidate_threshold, threshold
            );
            self.invalidate_threshold = threshold;
        }

        if self.queue_capacity == 0 {
            warn!("queue_capacity must be positive, using 1");
            self.queue_capacity = 1;
        }

        self
    }
}
