use serde::{Deserialize, Serialize};

use crate::entity::{ContentKind, Direction};
use crate::state::clamp_unit;

/// Default split between generation and network progress on the visual scale
pub const DEFAULT_GENERATION_BOUNDARY: f32 = 0.35;

/// Inputs to [`blend`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendInput {
    pub uses_generation: bool,
    pub generation_done: bool,
    pub generation_progress: f32,
    pub raw_progress: f32,
    /// Boundary fraction `g`: generation maps onto `[0, g)`, transfer onto `[g, 1]`
    pub boundary: f32,
}

/// Combine raw transfer progress with local generation progress.
///
/// While generation runs the result stays strictly below the boundary, so the
/// handoff to network progress never moves backwards.
pub fn blend(input: BlendInput) -> f32 {
    let raw = clamp_unit(input.raw_progress);
    if !input.uses_generation {
        return raw;
    }

    let boundary = clamp_unit(input.boundary);
    if input.generation_done {
        return clamp_unit(boundary + raw * (1.0 - boundary));
    }

    let visual = clamp_unit(input.generation_progress) * boundary;
    if visual >= boundary && boundary > 0.0 {
        // Generation reports 1.0 but has not signalled completion yet.
        return prev_below(boundary);
    }
    visual
}

fn prev_below(value: f32) -> f32 {
    let below = f32::from_bits(value.to_bits() - 1);
    below.max(0.0)
}

/// Decides which entities route their progress through the generation scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendPolicy {
    /// Content kinds that are transcoded locally before upload
    pub generated_kinds: Vec<ContentKind>,
    /// Apply blending to received files as well as sent ones
    pub blend_receives: bool,
}

impl Default for BlendPolicy {
    fn default() -> Self {
        Self {
            generated_kinds: vec![ContentKind::Video, ContentKind::Animation],
            blend_receives: false,
        }
    }
}

impl BlendPolicy {
    /// Blending disabled for everything
    pub fn disabled() -> Self {
        Self {
            generated_kinds: Vec::new(),
            blend_receives: false,
        }
    }

    pub fn uses_generation(&self, kind: ContentKind, direction: Direction) -> bool {
        if direction == Direction::Receive && !self.blend_receives {
            return false;
        }
        self.generated_kinds.contains(&kind)
    }
}
