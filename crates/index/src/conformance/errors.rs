use std::future::Future;

use searchsync_core::{Script, Selector};

use super::{seeded, TestResult, TABLES};
use crate::record::{IndexDefinition, SearchRequest};
use crate::{IndexError, SearchBackend};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "errors",
            "update_in_unknown_index",
            update_in_unknown_index(factory).await,
        ),
        TestResult::from_result(
            "errors",
            "update_by_query_in_unknown_index",
            update_by_query_in_unknown_index(factory).await,
        ),
        TestResult::from_result(
            "errors",
            "create_existing_index_fails",
            create_existing_index_fails(factory).await,
        ),
        TestResult::from_result(
            "errors",
            "delete_unknown_index",
            delete_unknown_index(factory).await,
        ),
        TestResult::from_result(
            "errors",
            "alias_on_unknown_index",
            alias_on_unknown_index(factory).await,
        ),
    ]
}

fn expect_not_found<T: std::fmt::Debug>(
    result: Result<T, IndexError>,
    index: &str,
) -> Result<(), String> {
    match result {
        Err(IndexError::IndexNotFound { index: got }) if got == index => Ok(()),
        other => Err(format!("expected IndexNotFound({index}), got {other:?}")),
    }
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn update_in_unknown_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found(
        s.update_document("ghost", "x", &Script::SoftDeleteRestore { deleted: true })
            .await,
        "ghost",
    )
}

async fn update_by_query_in_unknown_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    expect_not_found(
        s.update_by_query(
            "ghost",
            &Selector::All,
            &Script::SoftDeleteRestore { deleted: true },
        )
        .await,
        "ghost",
    )?;
    expect_not_found(s.search(&SearchRequest::new("ghost")).await, "ghost")
}

async fn create_existing_index_fails<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    match s.create_index(&IndexDefinition::new(TABLES)).await {
        Err(_) => {}
        Ok(()) => return Err("second create of the same index succeeded".into()),
    }
    let page = s
        .search(&SearchRequest::new(TABLES))
        .await
        .map_err(|e| e.to_string())?;
    if page.total != 3 {
        return Err(format!("failed create must not wipe documents, saw {}", page.total));
    }
    Ok(())
}

async fn delete_unknown_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found(s.delete_index("ghost").await, "ghost")
}

async fn alias_on_unknown_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found(s.put_alias("ghost", "all").await, "ghost")
}
