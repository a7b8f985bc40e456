//! Transition plan between adjacent clips.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of transition at a clip boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Hard cut
    #[default]
    Cut,
    /// Cross-dissolve between the two clips
    Crossfade,
    /// Dip through black
    Fade,
}

impl TransitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::Cut => "cut",
            TransitionType::Crossfade => "crossfade",
            TransitionType::Fade => "fade",
        }
    }

    /// Whether this transition blends frames across the boundary.
    pub fn is_dissolve(&self) -> bool {
        !matches!(self, TransitionType::Cut)
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransitionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cut" => Ok(TransitionType::Cut),
            "crossfade" | "dissolve" => Ok(TransitionType::Crossfade),
            "fade" => Ok(TransitionType::Fade),
            other => Err(format!("unknown transition type: {}", other)),
        }
    }
}

/// Planned transition from the scene planner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    pub from_index: u32,
    pub to_index: u32,
    #[serde(rename = "type", default)]
    pub transition_type: TransitionType,
    /// Requested duration in seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub rationale: String,
}

impl Transition {
    pub fn new(from_index: u32, transition_type: TransitionType, duration: f64) -> Self {
        Self {
            from_index,
            to_index: from_index + 1,
            transition_type,
            duration,
            rationale: String::new(),
        }
    }
}

/// Transition at one clip boundary after resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTransition {
    /// Index of the clip before the boundary
    pub from_index: u32,
    pub transition_type: TransitionType,
    /// Duration in seconds, 0 for cuts
    pub duration: f64,
}

impl ResolvedTransition {
    pub fn cut(from_index: u32) -> Self {
        Self {
            from_index,
            transition_type: TransitionType::Cut,
            duration: 0.0,
        }
    }
}

/// Exactly one resolved transition per clip boundary.
#[derive(Debug, Clone, Default)]
pub struct TransitionPlan {
    pub boundaries: Vec<ResolvedTransition>,
}

impl TransitionPlan {
    /// Resolve the planner's transitions against `clip_count` clips.
    ///
    /// Missing boundaries, entries whose `to_index` is not `from_index + 1`,
    /// out-of-range indices and non-positive dissolve durations all resolve to
    /// a cut. Dissolve durations are clamped to `max_duration`. The first entry
    /// wins when a boundary is listed twice.
    pub fn resolve(clip_count: usize, transitions: &[Transition], max_duration: f64) -> Self {
        let boundary_count = clip_count.saturating_sub(1);
        let mut boundaries: Vec<Option<ResolvedTransition>> = vec![None; boundary_count];

        for t in transitions {
            let from = t.from_index as usize;
            if from >= boundary_count || t.to_index != t.from_index + 1 {
                continue;
            }
            if boundaries[from].is_some() {
                continue;
            }

            let resolved = if t.transition_type.is_dissolve() && t.duration > 0.0 {
                ResolvedTransition {
                    from_index: t.from_index,
                    transition_type: t.transition_type,
                    duration: t.duration.min(max_duration),
                }
            } else {
                ResolvedTransition::cut(t.from_index)
            };
            boundaries[from] = Some(resolved);
        }

        Self {
            boundaries: boundaries
                .into_iter()
                .enumerate()
                .map(|(i, b)| b.unwrap_or_else(|| ResolvedTransition::cut(i as u32)))
                .collect(),
        }
    }

    /// Plan with only hard cuts.
    pub fn all_cuts(clip_count: usize) -> Self {
        Self::resolve(clip_count, &[], 0.0)
    }

    /// Whether any boundary needs a dissolve.
    pub fn has_dissolves(&self) -> bool {
        self.boundaries
            .iter()
            .any(|b| b.transition_type.is_dissolve())
    }

    pub fn dissolve_count(&self) -> usize {
        self.boundaries
            .iter()
            .filter(|b| b.transition_type.is_dissolve())
            .count()
    }
}
