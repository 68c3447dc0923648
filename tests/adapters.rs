//! Runs against a live PostgreSQL. Set `DATABASE_URL` and run with
//! `cargo test --test adapters -- --ignored`.

mod common;

use std::sync::Arc;

use resolvespec::backend::{PostgresDatabase, SqlxDatabase};
use resolvespec::query::{transaction, Database};
use resolvespec::service::{CrudRequest, Operation};
use resolvespec::{CrudHandler, ModelRegistry, QueryError};
use serde_json::json;

use common::Department;

fn database_url() -> Option<String> {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty())
}

async fn prepare(db: &dyn Database, schema: &str) {
    for sql in [
        format!("DROP SCHEMA IF EXISTS {} CASCADE", schema),
        format!("CREATE SCHEMA {}", schema),
        format!(
            "CREATE TABLE {}.departments (id text PRIMARY KEY, name text NOT NULL, code text UNIQUE, floor integer)",
            schema
        ),
    ] {
        db.exec(&sql, &[]).await.unwrap();
    }
}

async fn exercise(db: Arc<dyn Database>, schema: &'static str) {
    prepare(db.as_ref(), schema).await;
    let registry = ModelRegistry::new();
    registry.register_type::<Department>("departments").unwrap();
    let crud = CrudHandler::new(Arc::new(registry), db.clone());

    let err = crud
        .handle(CrudRequest::new(schema, "departments", Operation::Create).with_data(json!([
            {"id": "d4", "name": "Ops"},
            {"id": "d4", "name": "Ops again"}
        ])))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "query_error");
    assert!(err.to_string().contains("duplicate key"), "{}", err);
    let err = crud
        .handle(CrudRequest::new(schema, "departments", Operation::Read).with_id("d4"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    crud.handle(CrudRequest::new(schema, "departments", Operation::Create).with_data(json!({"id": "d1", "name": "Eng"})))
        .await
        .unwrap();
    let err = crud
        .handle(CrudRequest::new(schema, "departments", Operation::Update).with_data(json!([
            {"id": "d1", "name": "Platform"},
            {"id": "d9", "name": "Nowhere"}
        ])))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
    let res = crud
        .handle(CrudRequest::new(schema, "departments", Operation::Read).with_id("d1"))
        .await
        .unwrap();
    assert_eq!(res["data"]["name"], "Eng");

    let table = format!("{}.departments", schema);
    let err = transaction(db.as_ref(), move |tx| {
        Box::pin(async move {
            tx.new_insert()
                .table(&table)
                .value("id", json!("d5"))
                .value("name", json!("Temp"))
                .exec()
                .await?;
            Err(QueryError::Rejected("stop".into()))
        })
    })
    .await
    .unwrap_err();
    assert!(matches!(err, QueryError::Rejected(ref m) if m == "stop"));
    let rows = db
        .query(&format!("SELECT id FROM {}.departments WHERE id = ?", schema), &[json!("d5")])
        .await
        .unwrap();
    assert!(rows.is_empty());

    let table = format!("{}.departments", schema);
    transaction(db.as_ref(), move |tx| {
        Box::pin(async move {
            tx.new_insert()
                .table(&table)
                .value("id", json!("d6"))
                .value("name", json!("Kept"))
                .exec()
                .await?;
            match transaction(tx, |_| Box::pin(async { Ok::<(), QueryError>(()) })).await {
                Err(QueryError::UnsupportedNesting) => Ok(()),
                other => Err(QueryError::Rejected(format!("nested call returned {:?}", other))),
            }
        })
    })
    .await
    .unwrap();
    let rows = db
        .query(&format!("SELECT name FROM {}.departments WHERE id = ?", schema), &[json!("d6")])
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"name": "Kept"})]);

    db.exec(&format!("DROP SCHEMA {} CASCADE", schema), &[]).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn sqlx_transactions() {
    let Some(url) = database_url() else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let db = SqlxDatabase::connect(&url, 2).await.unwrap();
    exercise(Arc::new(db), "resolvespec_sqlx").await;
}

#[tokio::test]
#[ignore]
async fn postgres_transactions() {
    let Some(url) = database_url() else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let db = PostgresDatabase::connect(&url, 2).unwrap();
    exercise(Arc::new(db), "resolvespec_pg").await;
}
