// src/worker/state.rs

//! Execution state machine
//!
//! ```text
//! Init -> Staged -> Analyzed -> Gated -> [Queried] -> Reported -> Cleaned
//! ```
//!
//! `Cleaned` is reachable from every state. A fatal error jumps straight
//! there, keeping whatever was produced before it.

use serde::Serialize;
use strum_macros::Display;

/// Phases of one build execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum ExecutionState {
    /// Nothing created yet
    Init,
    /// Manifest and inputs copied into the helper container
    Staged,
    /// Images analyzed; gate and then queries are now allowed
    Analyzed,
    /// Gate report written and verdict known
    Gated,
    /// Query batch finished (optional branch)
    Queried,
    /// Reports archived and verdict record built
    Reported,
    /// Staging torn down
    Cleaned,
}

impl ExecutionState {
    /// Whether `next` directly follows this state
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (_, Cleaned)
                | (Init, Staged)
                | (Staged, Analyzed)
                | (Analyzed, Gated)
                | (Gated, Queried)
                | (Gated, Reported)
                | (Queried, Reported)
        )
    }

    /// Gate and query may only run once analysis has succeeded
    pub fn is_analyzed(self) -> bool {
        matches!(
            self,
            Self::Analyzed | Self::Queried | Self::Gated | Self::Reported
        )
    }
}
