//! "Latest wins" status rollup for time-series results onto their parent.
//!
//! A parent is either in [`RollupState::NoResults`] or
//! [`RollupState::HasLatest`]. Creates and updates move the pointer forward
//! when their timestamp is not older than the current one; deleting the
//! record the pointer names forces a rescan of the remaining history.

use crate::model::{StatusPointer, TestCaseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollupState {
    NoResults,
    HasLatest(StatusPointer),
}

/// What a single result event does to the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The pointer stays as it is.
    Keep,
    /// The pointer moves to the given result.
    Replace(StatusPointer),
    /// The current latest was deleted; the caller must rescan history and
    /// settle with [`recompute`].
    Recompute,
}

impl RollupState {
    pub fn from_pointer(pointer: Option<StatusPointer>) -> Self {
        match pointer {
            Some(p) => RollupState::HasLatest(p),
            None => RollupState::NoResults,
        }
    }

    pub fn pointer(&self) -> Option<&StatusPointer> {
        match self {
            RollupState::NoResults => None,
            RollupState::HasLatest(p) => Some(p),
        }
    }

    pub fn into_pointer(self) -> Option<StatusPointer> {
        match self {
            RollupState::NoResults => None,
            RollupState::HasLatest(p) => Some(p),
        }
    }

    /// Decide the transition for a result event.
    pub fn on_event(&self, result: &TestCaseResult, op: ResultOperation) -> Transition {
        match op {
            ResultOperation::Create | ResultOperation::Update => self.on_upsert(result),
            ResultOperation::Delete => self.on_delete(result.timestamp),
        }
    }

    /// Ties on timestamp favour the incoming (most recently ingested) result.
    pub fn on_upsert(&self, result: &TestCaseResult) -> Transition {
        match self {
            RollupState::NoResults => Transition::Replace(result.pointer()),
            RollupState::HasLatest(current) if result.timestamp >= current.timestamp => {
                let next = result.pointer();
                if &next == current {
                    Transition::Keep
                } else {
                    Transition::Replace(next)
                }
            }
            RollupState::HasLatest(_) => Transition::Keep,
        }
    }

    pub fn on_delete(&self, timestamp: i64) -> Transition {
        match self {
            RollupState::HasLatest(current) if current.timestamp == timestamp => {
                Transition::Recompute
            }
            _ => Transition::Keep,
        }
    }
}

/// Resolve the latest result from a parent's remaining history, given in
/// insertion order. The maximum timestamp wins; ties go to the record
/// inserted last. Empty history yields [`RollupState::NoResults`].
pub fn recompute(history: &[TestCaseResult]) -> RollupState {
    let mut latest: Option<&TestCaseResult> = None;
    for result in history {
        match latest {
            Some(best) if result.timestamp < best.timestamp => {}
            _ => latest = Some(result),
        }
    }
    RollupState::from_pointer(latest.map(TestCaseResult::pointer))
}

/// Run a transition to completion. `history` is only consulted for
/// [`Transition::Recompute`].
pub fn settle(
    state: &RollupState,
    transition: Transition,
    history: &[TestCaseResult],
) -> RollupState {
    match transition {
        Transition::Keep => state.clone(),
        Transition::Replace(p) => RollupState::HasLatest(p),
        Transition::Recompute => recompute(history),
    }
}
