use std::future::Future;

use serde_json::json;

use super::{doc, seeded, TestResult, ALIAS, COLUMNS, TABLES};
use crate::record::{IndexDefinition, SearchRequest};
use crate::{IndexError, SearchBackend};

pub(super) async fn run_admin_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "admin",
            "created_index_exists",
            created_index_exists(factory).await,
        ),
        TestResult::from_result(
            "admin",
            "create_registers_aliases",
            create_registers_aliases(factory).await,
        ),
        TestResult::from_result(
            "admin",
            "put_mapping_merges_fields",
            put_mapping_merges_fields(factory).await,
        ),
        TestResult::from_result(
            "admin",
            "delete_index_drops_dangling_aliases",
            delete_index_drops_dangling_aliases(factory).await,
        ),
        TestResult::from_result(
            "admin",
            "remove_alias_detaches_one_index",
            remove_alias_detaches_one_index(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn created_index_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    if s.index_exists(TABLES).await.map_err(|e| e.to_string())? {
        return Err("fresh backend reports index as existing".into());
    }
    s.create_index(&IndexDefinition::new(TABLES))
        .await
        .map_err(|e| e.to_string())?;
    if !s.index_exists(TABLES).await.map_err(|e| e.to_string())? {
        return Err("index missing after create".into());
    }
    let names = s.list_indexes().await.map_err(|e| e.to_string())?;
    if names != vec![TABLES.to_string()] {
        return Err(format!("expected [{TABLES}], got {names:?}"));
    }
    Ok(())
}

async fn create_registers_aliases<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.create_index(&IndexDefinition::new(TABLES).with_alias("table").with_alias(ALIAS))
        .await
        .map_err(|e| e.to_string())?;
    let aliases = s.get_aliases(TABLES).await.map_err(|e| e.to_string())?;
    if aliases != vec![ALIAS.to_string(), "table".to_string()] {
        return Err(format!("unexpected aliases {aliases:?}"));
    }
    Ok(())
}

async fn put_mapping_merges_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let def = IndexDefinition::new(TABLES).with_mapping(doc(json!({"name": {"type": "text"}})));
    s.create_index(&def).await.map_err(|e| e.to_string())?;
    s.put_mapping(TABLES, &doc(json!({"owners": {"type": "nested"}})))
        .await
        .map_err(|e| e.to_string())?;
    let mapping = s.get_mapping(TABLES).await.map_err(|e| e.to_string())?;
    if !mapping.contains_key("name") || !mapping.contains_key("owners") {
        return Err(format!("mapping not merged: {mapping:?}"));
    }
    Ok(())
}

/// Deleting one index keeps the alias alive for the others; deleting the
/// last one leaves nothing behind.
async fn delete_index_drops_dangling_aliases<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    s.delete_index(TABLES).await.map_err(|e| e.to_string())?;
    let page = s
        .search(&SearchRequest::new(ALIAS).page(0, 100))
        .await
        .map_err(|e| e.to_string())?;
    if page.total != 1 {
        return Err(format!("alias should cover one column, saw {}", page.total));
    }
    s.delete_index(COLUMNS).await.map_err(|e| e.to_string())?;
    match s.search(&SearchRequest::new(ALIAS)).await {
        Err(IndexError::IndexNotFound { .. }) => Ok(()),
        other => Err(format!("expected IndexNotFound for dangling alias, got {other:?}")),
    }
}

async fn remove_alias_detaches_one_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    s.remove_alias(COLUMNS, ALIAS)
        .await
        .map_err(|e| e.to_string())?;
    let page = s
        .search(&SearchRequest::new(ALIAS).page(0, 100))
        .await
        .map_err(|e| e.to_string())?;
    if page.hits.iter().any(|h| h.index == COLUMNS) {
        return Err("alias still resolves to detached index".into());
    }
    if page.total != 3 {
        return Err(format!("expected 3 tables behind alias, got {}", page.total));
    }
    Ok(())
}
