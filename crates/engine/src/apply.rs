//! Turning propagation targets into backend calls.

use searchsync_core::{PropagationTarget, Selector, TargetAction};
use searchsync_index::{BulkOperation, IndexError, SearchBackend, WriteOutcome};

/// Apply one target. Scripts on documents that do not exist are no-ops.
pub async fn apply_target(
    backend: &dyn SearchBackend,
    target: &PropagationTarget,
) -> Result<(), IndexError> {
    match (&target.selector, &target.action) {
        (Selector::Id { id }, TargetAction::Index { document }) => {
            backend
                .index_document(&target.index, id, document.clone())
                .await?;
        }
        (selector, TargetAction::Index { .. }) => {
            return Err(IndexError::Backend(format!(
                "whole-document writes need an id selector, got {selector:?}"
            )));
        }
        (Selector::Id { id }, TargetAction::Script { script }) => {
            let outcome = backend.update_document(&target.index, id, script).await?;
            if outcome == WriteOutcome::Missing {
                tracing::debug!(index = %target.index, doc_id = %id, "script target not indexed yet");
            }
        }
        (selector, TargetAction::Script { script }) => {
            let res = backend
                .update_by_query(&target.index, selector, script)
                .await?;
            tracing::debug!(
                index = %target.index,
                script = script.name(),
                matched = res.matched,
                changed = res.changed,
                "update by query"
            );
        }
        (Selector::Id { id }, TargetAction::Delete) => {
            backend.delete_document(&target.index, id).await?;
        }
        (selector, TargetAction::Delete) => {
            backend.delete_by_query(&target.index, selector).await?;
        }
    }
    Ok(())
}

/// Apply one bulk entry on its own.
pub async fn apply_bulk_item(
    backend: &dyn SearchBackend,
    op: &BulkOperation,
) -> Result<WriteOutcome, IndexError> {
    match op {
        BulkOperation::Index {
            index,
            id,
            document,
        } => backend.index_document(index, id, document.clone()).await,
        BulkOperation::Update { index, id, script } => {
            backend.update_document(index, id, script).await
        }
        BulkOperation::Delete { index, id } => backend.delete_document(index, id).await,
    }
}

/// Outcome counts of applying a group of targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub applied: usize,
    pub failed: usize,
}

impl GroupReport {
    fn absorb(&mut self, other: GroupReport) {
        self.applied += other.applied;
        self.failed += other.failed;
    }
}

fn as_bulk(target: &PropagationTarget) -> Option<BulkOperation> {
    let id = target.selector.as_id()?.to_string();
    let index = target.index.clone();
    Some(match &target.action {
        TargetAction::Index { document } => BulkOperation::Index {
            index,
            id,
            document: document.clone(),
        },
        TargetAction::Script { script } => BulkOperation::Update {
            index,
            id,
            script: script.clone(),
        },
        TargetAction::Delete => BulkOperation::Delete { index, id },
    })
}

/// Apply a group of targets in order, logging and skipping failures.
///
/// Runs of two or more single-document targets go out as one bulk request;
/// a backend that declines bulk gets them one by one instead.
pub async fn apply_group(
    backend: &dyn SearchBackend,
    targets: &[PropagationTarget],
    label: &str,
) -> GroupReport {
    let mut report = GroupReport::default();
    let mut i = 0;
    while i < targets.len() {
        let run: Vec<BulkOperation> = targets[i..].iter().map_while(as_bulk).collect();
        if run.len() >= 2 {
            let len = run.len();
            report.absorb(apply_bulk(backend, run, &targets[i..i + len], label).await);
            i += len;
        } else {
            report.absorb(apply_one(backend, &targets[i], label).await);
            i += 1;
        }
    }
    report
}

async fn apply_one(
    backend: &dyn SearchBackend,
    target: &PropagationTarget,
    label: &str,
) -> GroupReport {
    match apply_target(backend, target).await {
        Ok(()) => GroupReport {
            applied: 1,
            failed: 0,
        },
        Err(e) => {
            tracing::warn!(
                label,
                index = %target.index,
                target = %target.describe(),
                error = %e,
                "dropping failed index update"
            );
            GroupReport {
                applied: 0,
                failed: 1,
            }
        }
    }
}

async fn apply_bulk(
    backend: &dyn SearchBackend,
    ops: Vec<BulkOperation>,
    targets: &[PropagationTarget],
    label: &str,
) -> GroupReport {
    match backend.bulk(ops).await {
        Ok(response) => {
            for item in response.items.iter().filter(|i| i.error.is_some()) {
                tracing::warn!(
                    label,
                    index = %item.index,
                    doc_id = %item.id,
                    error = item.error.as_deref().unwrap_or_default(),
                    "dropping failed bulk item"
                );
            }
            let failed = response.failed();
            GroupReport {
                applied: response.items.len() - failed,
                failed,
            }
        }
        Err(IndexError::NotImplemented { .. }) => {
            tracing::debug!(label, "bulk not supported, applying one by one");
            let mut report = GroupReport::default();
            for target in targets {
                report.absorb(apply_one(backend, target, label).await);
            }
            report
        }
        Err(e) => {
            tracing::warn!(label, count = targets.len(), error = %e, "dropping failed bulk request");
            GroupReport {
                applied: 0,
                failed: targets.len(),
            }
        }
    }
}
