//! Global state held by the master
//!
//! The runtime collects updates from all vertices and applies them at the
//! barrier at the end of each superstep. The state also steers the run:
//! it can wake every vertex, react to quiescence and declare termination.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::vertex::StateUpdate;

/// Trait for global state managed by the Pregel runtime
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct RoundState { round: usize, done: bool }
///
/// impl MasterState for RoundState {
///     type Update = RoundUpdate;
///
///     fn apply_update(&self, update: Self::Update) -> Self {
///         RoundState { round: self.round + 1, done: update.finished }
///     }
///
///     fn merge_updates(updates: Vec<Self::Update>) -> Self::Update {
///         RoundUpdate { finished: updates.iter().all(|u| u.finished) }
///     }
///
///     fn is_terminal(&self) -> bool {
///         self.done
///     }
/// }
/// ```
pub trait MasterState: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// What each vertex contributes per superstep
    type Update: StateUpdate;

    /// Next state after one superstep's merged update; `self` is left untouched
    fn apply_update(&self, update: Self::Update) -> Self;

    /// Combine the contributions of one superstep, independent of their order
    fn merge_updates(updates: Vec<Self::Update>) -> Self::Update;

    /// When true, the run terminates regardless of vertex states
    fn is_terminal(&self) -> bool {
        false
    }

    /// When true, every non-completed vertex is activated for the next superstep
    fn activate_all(&self) -> bool {
        false
    }

    /// Called when all vertices are halted and no messages are pending
    ///
    /// Returning a new state continues the run from it; `None` finishes.
    fn on_quiescence(&self) -> Option<Self> {
        None
    }

    /// Short name of the current stage, for progress reporting
    fn phase_name(&self) -> String {
        String::new()
    }

    /// Merge all updates of a superstep and apply the result
    ///
    /// Applied even when no vertex computed, so the state always advances.
    fn apply_updates(&self, updates: Vec<Self::Update>) -> Self {
        let merged = if updates.is_empty() {
            Self::Update::empty()
        } else {
            Self::merge_updates(updates)
        };
        self.apply_update(merged)
    }
}
