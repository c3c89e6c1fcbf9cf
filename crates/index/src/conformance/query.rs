use std::future::Future;

use searchsync_core::{Script, Selector};

use super::{seeded, TestResult, ALIAS, TABLES};
use crate::record::{SearchRequest, SortOrder, TermsBucket, TermsRequest};
use crate::SearchBackend;

pub(super) async fn run_query_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "query",
            "update_by_query_fans_out_over_alias",
            update_by_query_fans_out_over_alias(factory).await,
        ),
        TestResult::from_result(
            "query",
            "deleted_documents_hidden_unless_requested",
            deleted_documents_hidden_unless_requested(factory).await,
        ),
        TestResult::from_result(
            "query",
            "delete_by_fqn_prefix",
            delete_by_fqn_prefix(factory).await,
        ),
        TestResult::from_result(
            "query",
            "paging_reports_full_total",
            paging_reports_full_total(factory).await,
        ),
        TestResult::from_result(
            "query",
            "terms_count_documents_per_key",
            terms_count_documents_per_key(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

async fn update_by_query_fans_out_over_alias<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let selector = Selector::field("databaseSchema.id", "s1");
    let script = Script::SoftDeleteRestore { deleted: true };
    let first = s
        .update_by_query(ALIAS, &selector, &script)
        .await
        .map_err(|e| e.to_string())?;
    if first.matched != 3 || first.changed != 3 {
        return Err(format!("expected 3 matched and changed, got {first:?}"));
    }
    let again = s
        .update_by_query(ALIAS, &selector, &script)
        .await
        .map_err(|e| e.to_string())?;
    if again.matched != 3 || again.changed != 0 {
        return Err(format!("re-application should change nothing, got {again:?}"));
    }
    Ok(())
}

async fn deleted_documents_hidden_unless_requested<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    s.update_document(TABLES, "t1", &Script::SoftDeleteRestore { deleted: true })
        .await
        .map_err(|e| e.to_string())?;
    let live = s
        .search(&SearchRequest::new(TABLES))
        .await
        .map_err(|e| e.to_string())?;
    if live.total != 2 || live.hits.iter().any(|h| h.id == "t1") {
        return Err(format!("soft-deleted t1 leaked into default search: {live:?}"));
    }
    let all = s
        .search(&SearchRequest::new(TABLES).include_deleted(true))
        .await
        .map_err(|e| e.to_string())?;
    if all.total != 3 {
        return Err(format!("include_deleted should return 3, got {}", all.total));
    }
    Ok(())
}

async fn delete_by_fqn_prefix<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let removed = s
        .delete_by_query(TABLES, &Selector::fqn_prefix("svc.db.s1."))
        .await
        .map_err(|e| e.to_string())?;
    if removed.changed != 2 {
        return Err(format!("expected 2 deletions, got {removed:?}"));
    }
    let left = s
        .search(&SearchRequest::new(TABLES))
        .await
        .map_err(|e| e.to_string())?;
    if left.total != 1 || left.hits[0].id != "t3" {
        return Err(format!("expected only t3 left, got {left:?}"));
    }
    Ok(())
}

async fn paging_reports_full_total<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let page = s
        .search(
            &SearchRequest::new(TABLES)
                .sort_by("id", SortOrder::Desc)
                .page(1, 1),
        )
        .await
        .map_err(|e| e.to_string())?;
    if page.total != 3 || page.hits.len() != 1 || page.hits[0].id != "t2" {
        return Err(format!("unexpected page {page:?}"));
    }
    Ok(())
}

async fn terms_count_documents_per_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded(&s).await?;
    let buckets = s
        .terms(&TermsRequest {
            search: SearchRequest::new(ALIAS),
            field: "databaseSchema.id".into(),
            size: 10,
        })
        .await
        .map_err(|e| e.to_string())?;
    let expected = vec![
        TermsBucket {
            key: "s1".into(),
            doc_count: 3,
        },
        TermsBucket {
            key: "s2".into(),
            doc_count: 1,
        },
    ];
    if buckets != expected {
        return Err(format!("unexpected buckets {buckets:?}"));
    }
    Ok(())
}
