use std::future::Future;

use serde_json::json;

use searchsync_core::Script;

use super::{doc, seeded, table_doc, TestResult, ALIAS, TABLES};
use crate::record::{BulkOperation, WriteOutcome};
use crate::{IndexError, SearchBackend};

pub(super) async fn run_document_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "documents",
            "index_reports_created_then_updated",
            index_reports_created_then_updated(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "reapplied_script_is_noop",
            reapplied_script_is_noop(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "update_of_missing_document_is_not_an_error",
            update_of_missing_document_is_not_an_error(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "delete_then_delete_again",
            delete_then_delete_again(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "get_document_through_alias",
            get_document_through_alias(factory).await,
        ),
        TestResult::from_result(
            "documents",
            "bulk_applies_in_order_or_declines",
            bulk_applies_in_order_or_declines(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn index_reports_created_then_updated<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let first = s
        .index_document(TABLES, "t9", table_doc("t9", "s1", None))
        .await
        .map_err(|e| e.to_string())?;
    let second = s
        .index_document(TABLES, "t9", table_doc("t9", "s2", None))
        .await
        .map_err(|e| e.to_string())?;
    if (first, second) != (WriteOutcome::Created, WriteOutcome::Updated) {
        return Err(format!("expected Created then Updated, got {first:?} then {second:?}"));
    }
    Ok(())
}

async fn reapplied_script_is_noop<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let script = Script::SetFields {
        fields: doc(json!({"description": "orders"})),
    };
    let first = s
        .update_document(TABLES, "t1", &script)
        .await
        .map_err(|e| e.to_string())?;
    let second = s
        .update_document(TABLES, "t1", &script)
        .await
        .map_err(|e| e.to_string())?;
    if first != WriteOutcome::Updated || second != WriteOutcome::Noop {
        return Err(format!("expected Updated then Noop, got {first:?} then {second:?}"));
    }
    let stored = s
        .get_document(TABLES, "t1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("t1 vanished")?;
    if stored.get("description") != Some(&json!("orders")) {
        return Err(format!("script not applied: {stored:?}"));
    }
    Ok(())
}

async fn update_of_missing_document_is_not_an_error<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let outcome = s
        .update_document(TABLES, "not-yet-indexed", &Script::SoftDeleteRestore { deleted: true })
        .await
        .map_err(|e| e.to_string())?;
    if outcome != WriteOutcome::Missing {
        return Err(format!("expected Missing, got {outcome:?}"));
    }
    if s.get_document(TABLES, "not-yet-indexed")
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("update must not create the document".into());
    }
    Ok(())
}

async fn delete_then_delete_again<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let first = s
        .delete_document(TABLES, "t2")
        .await
        .map_err(|e| e.to_string())?;
    let second = s
        .delete_document(TABLES, "t2")
        .await
        .map_err(|e| e.to_string())?;
    if (first, second) != (WriteOutcome::Deleted, WriteOutcome::Missing) {
        return Err(format!("expected Deleted then Missing, got {first:?} then {second:?}"));
    }
    Ok(())
}

async fn get_document_through_alias<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let found = s
        .get_document(ALIAS, "c1")
        .await
        .map_err(|e| e.to_string())?;
    if found.is_none() {
        return Err("column not reachable through alias".into());
    }
    Ok(())
}

/// Backends may decline bulk; if they accept it, items are applied in order
/// and a failing item does not stop the rest.
async fn bulk_applies_in_order_or_declines<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let ops = vec![
        BulkOperation::Index {
            index: TABLES.into(),
            id: "t7".into(),
            document: table_doc("t7", "s1", None),
        },
        BulkOperation::Update {
            index: "no_such_index".into(),
            id: "t7".into(),
            script: Script::SoftDeleteRestore { deleted: true },
        },
        BulkOperation::Update {
            index: TABLES.into(),
            id: "t7".into(),
            script: Script::SoftDeleteRestore { deleted: true },
        },
    ];
    let response = match s.bulk(ops).await {
        Err(IndexError::NotImplemented { .. }) => return Ok(()),
        other => other.map_err(|e| e.to_string())?,
    };
    if response.items.len() != 3 || response.failed() != 1 {
        return Err(format!("unexpected bulk response {response:?}"));
    }
    if response.items[2].outcome != Some(WriteOutcome::Updated) {
        return Err(format!("update after index should apply, got {:?}", response.items[2]));
    }
    Ok(())
}
