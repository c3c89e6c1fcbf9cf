//! Conformance test suite for `SearchBackend` implementations.
//!
//! A backend-agnostic suite that any `SearchBackend` can run to verify it
//! honours the contract the synchronization engine relies on:
//!
//! - **Admin**: index create/delete, mapping merge, alias bookkeeping
//! - **Documents**: whole-document writes, scripted updates, missing-document no-ops
//! - **Query**: update/delete-by-query through aliases, search filters, paging, terms
//! - **Errors**: correct error variants for unknown indices and declined bulk
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that creates
//! a fresh, empty backend for each test:
//!
//! ```ignore
//! use searchsync_index::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn opensearch_conformance() {
//!     let report = run_conformance_suite(|| async { connect_test_cluster().await }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod admin;
mod documents;
mod errors;
mod query;

use std::fmt;
use std::future::Future;

use serde_json::{json, Value};

use searchsync_core::Document;

use crate::record::IndexDefinition;
use crate::SearchBackend;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "admin", "documents").
    pub category: String,
    pub name: String,
    pub passed: bool,
    /// Failure message, if any.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in self.results.iter().filter(|r| !r.passed) {
            writeln!(
                f,
                "  FAIL [{}/{}]: {}",
                r.category,
                r.name,
                r.message.as_deref().unwrap_or("(no message)")
            )?;
        }
        Ok(())
    }
}

/// Run the full conformance suite against a search backend.
///
/// `factory` is called once per test to create a fresh, empty backend.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: SearchBackend,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(admin::run_admin_tests(&factory).await);
    results.extend(documents::run_document_tests(&factory).await);
    results.extend(query::run_query_tests(&factory).await);
    results.extend(errors::run_error_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: fixtures shared by the categories ───────────────────────────────

const TABLES: &str = "conformance_table";
const COLUMNS: &str = "conformance_column";
const ALIAS: &str = "conformance_all";

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

fn table_doc(id: &str, schema_id: &str, owner: Option<&str>) -> Document {
    let mut d = doc(json!({
        "id": id,
        "fullyQualifiedName": format!("svc.db.{schema_id}.{id}"),
        "entityType": "table",
        "deleted": false,
        "databaseSchema": {"id": schema_id, "type": "databaseSchema"},
        "tags": [],
    }));
    if let Some(owner) = owner {
        d.insert(
            "owners".to_string(),
            json!([{"id": owner, "type": "user"}]),
        );
    }
    d
}

/// Two indices (tables and columns) behind one alias, seeded with three
/// tables in two schemas and one column.
async fn seeded<S: SearchBackend>(s: &S) -> Result<(), String> {
    s.create_index(&IndexDefinition::new(TABLES).with_alias(ALIAS))
        .await
        .map_err(|e| e.to_string())?;
    s.create_index(&IndexDefinition::new(COLUMNS).with_alias(ALIAS))
        .await
        .map_err(|e| e.to_string())?;
    for (id, schema, owner) in [
        ("t1", "s1", Some("alice")),
        ("t2", "s1", None),
        ("t3", "s2", None),
    ] {
        s.index_document(TABLES, id, table_doc(id, schema, owner))
            .await
            .map_err(|e| e.to_string())?;
    }
    s.index_document(COLUMNS, "c1", table_doc("c1", "s1", None))
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}
