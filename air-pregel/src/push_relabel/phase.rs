//! Master-side phase state machine
//!
//! The global state holds the current phase. At every barrier the merged
//! vertex reports decide the next phase:
//!
//! ```text
//! init ─▶ push ─┬─ pushes > 0 ──────────────▶ push
//!               ├─ none, overflowing > 0 ───▶ fetch-label ─▶ send-label ─▶ relabel ─▶ push
//!               └─ none, none overflowing ──▶ finalize(0) ─▶ finalize(1) ─▶ done
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pregel::{StateUpdate, MasterState};

/// Phase of the push-relabel program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "init-phase")]
    Init,
    #[serde(rename = "push-phase")]
    Push,
    #[serde(rename = "fetch-label-phase")]
    FetchLabel,
    #[serde(rename = "send-label-phase")]
    SendLabel,
    #[serde(rename = "relabel-phase")]
    Relabel,
    #[serde(rename = "finalize-phase")]
    Finalize,
    #[serde(rename = "done")]
    Done,
}

impl Phase {
    /// The declared phases, in program order
    pub const PROGRAM: [Phase; 6] = [
        Phase::Init,
        Phase::Push,
        Phase::FetchLabel,
        Phase::SendLabel,
        Phase::Relabel,
        Phase::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Init => "init-phase",
            Phase::Push => "push-phase",
            Phase::FetchLabel => "fetch-label-phase",
            Phase::SendLabel => "send-label-phase",
            Phase::Relabel => "relabel-phase",
            Phase::Finalize => "finalize-phase",
            Phase::Done => "done",
        }
    }

    pub fn from_name(name: &str) -> Option<Phase> {
        Phase::PROGRAM
            .into_iter()
            .chain([Phase::Done])
            .find(|phase| phase.name() == name)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What one vertex did in one superstep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub pushes: usize,
    pub relabels: usize,
    pub overflowing: usize,
}

impl PhaseReport {
    pub fn merge(self, other: PhaseReport) -> PhaseReport {
        PhaseReport {
            pushes: self.pushes + other.pushes,
            relabels: self.relabels + other.relabels,
            overflowing: self.overflowing + other.overflowing,
        }
    }
}

impl StateUpdate for PhaseReport {
    fn empty() -> Self {
        PhaseReport::default()
    }

    fn is_empty(&self) -> bool {
        *self == PhaseReport::default()
    }
}

/// Counters over the whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTotals {
    pub pushes: usize,
    pub relabels: usize,
    /// Completed fetch-label/send-label/relabel rounds
    pub relabel_rounds: usize,
}

/// Global state of a push-relabel run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub phase: Phase,
    /// Supersteps already spent in the current phase
    pub phase_step: usize,
    /// Merged report of the last superstep
    pub last: PhaseReport,
    pub totals: FlowTotals,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            phase: Phase::Init,
            phase_step: 0,
            last: PhaseReport::default(),
            totals: FlowTotals::default(),
        }
    }
}

impl FlowState {
    /// Global accumulators a program may declare, all `sum` over ints
    pub const GLOBALS: [&'static str; 3] = ["pushes", "relabels", "overflowing"];

    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a global accumulator.
    ///
    /// `pushes` and `relabels` count over the whole run; `overflowing` is
    /// reset every superstep and holds the last barrier's count.
    pub fn global(&self, name: &str) -> Option<usize> {
        match name {
            "pushes" => Some(self.totals.pushes),
            "relabels" => Some(self.totals.relabels),
            "overflowing" => Some(self.last.overflowing),
            _ => None,
        }
    }

    fn enter(&self, phase: Phase) -> FlowState {
        FlowState {
            phase,
            phase_step: if phase == self.phase { self.phase_step + 1 } else { 0 },
            ..self.clone()
        }
    }

    /// Phase following the current one, given the merged report
    fn next_phase(&self, report: &PhaseReport) -> Phase {
        match self.phase {
            Phase::Init => Phase::Push,
            Phase::Push if report.pushes > 0 => Phase::Push,
            Phase::Push if report.overflowing > 0 => Phase::FetchLabel,
            Phase::Push => Phase::Finalize,
            Phase::FetchLabel => Phase::SendLabel,
            Phase::SendLabel => Phase::Relabel,
            Phase::Relabel => Phase::Push,
            Phase::Finalize if self.phase_step == 0 => Phase::Finalize,
            Phase::Finalize | Phase::Done => Phase::Done,
        }
    }
}

impl MasterState for FlowState {
    type Update = PhaseReport;

    fn apply_update(&self, update: PhaseReport) -> Self {
        let mut next = self.enter(self.next_phase(&update));
        next.last = update;
        next.totals.pushes += update.pushes;
        next.totals.relabels += update.relabels;
        if self.phase == Phase::Relabel {
            next.totals.relabel_rounds += 1;
        }
        next
    }

    fn merge_updates(updates: Vec<PhaseReport>) -> PhaseReport {
        updates.into_iter().fold(PhaseReport::default(), PhaseReport::merge)
    }

    fn is_terminal(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Finalize needs every vertex, including those without messages
    fn activate_all(&self) -> bool {
        self.phase == Phase::Finalize
    }

    fn on_quiescence(&self) -> Option<Self> {
        match self.phase {
            Phase::Done => None,
            Phase::Finalize => Some(self.clone()),
            _ => Some(FlowState {
                phase: Phase::Finalize,
                phase_step: 0,
                ..self.clone()
            }),
        }
    }

    fn phase_name(&self) -> String {
        self.phase.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(pushes: usize, relabels: usize, overflowing: usize) -> PhaseReport {
        PhaseReport {
            pushes,
            relabels,
            overflowing,
        }
    }

    fn at(phase: Phase) -> FlowState {
        FlowState {
            phase,
            ..FlowState::default()
        }
    }

    #[test]
    fn test_phase_names_roundtrip() {
        for phase in Phase::PROGRAM {
            assert_eq!(Phase::from_name(phase.name()), Some(phase));
            assert_eq!(serde_json::to_value(phase).unwrap(), phase.name());
        }
        assert_eq!(Phase::from_name("relabel"), None);
    }

    #[test]
    fn test_push_phase_transitions() {
        let push = at(Phase::Push);
        let again = push.apply_update(report(3, 0, 2));
        assert_eq!(again.phase, Phase::Push);
        assert_eq!(again.phase_step, 1);

        assert_eq!(push.apply_update(report(0, 0, 2)).phase, Phase::FetchLabel);
        assert_eq!(push.apply_update(report(0, 0, 0)).phase, Phase::Finalize);
    }

    #[test]
    fn test_relabel_round_returns_to_push() {
        let mut state = at(Phase::FetchLabel);
        for expected in [Phase::SendLabel, Phase::Relabel, Phase::Push] {
            state = state.apply_updates(vec![report(0, 1, 1)]);
            assert_eq!(state.phase, expected);
            assert_eq!(state.phase_step, 0);
        }
        assert_eq!(state.totals.relabel_rounds, 1);
        assert_eq!(state.totals.relabels, 3);
    }

    #[test]
    fn test_finalize_takes_two_supersteps() {
        let state = at(Phase::Init).apply_updates(vec![]);
        assert_eq!(state.phase, Phase::Push);

        let finalize = at(Phase::Finalize);
        assert!(finalize.activate_all());
        let second = finalize.apply_updates(vec![]);
        assert_eq!((second.phase, second.phase_step), (Phase::Finalize, 1));
        let done = second.apply_updates(vec![]);
        assert!(done.is_terminal());
        assert!(!done.activate_all());
    }

    #[test]
    fn test_quiescence_moves_to_finalize() {
        let quiet = at(Phase::Push).on_quiescence().unwrap();
        assert_eq!((quiet.phase, quiet.phase_step), (Phase::Finalize, 0));
        assert_eq!(at(Phase::Finalize).on_quiescence(), Some(at(Phase::Finalize)));
        assert_eq!(at(Phase::Done).on_quiescence(), None);
    }

    #[test]
    fn test_globals_follow_reports() {
        let state = at(Phase::Push)
            .apply_update(report(2, 0, 3))
            .apply_update(report(1, 1, 1));
        assert_eq!(state.global("pushes"), Some(3));
        assert_eq!(state.global("relabels"), Some(1));
        assert_eq!(state.global("overflowing"), Some(1));
        assert_eq!(state.global("excess"), None);
        assert!(FlowState::GLOBALS.iter().all(|name| state.global(name).is_some()));
    }

    #[test]
    fn test_merge_sums_reports() {
        let merged = FlowState::merge_updates(vec![report(1, 0, 2), report(2, 1, 0), report(0, 0, 1)]);
        assert_eq!(merged, report(3, 1, 3));
        assert!(PhaseReport::empty().is_empty());
        assert_eq!(FlowState::new().phase_name(), "init-phase");
    }
}
