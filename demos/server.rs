//! Example server: registers two sample entities, creates their tables if
//! missing and serves the generic entity routes.

use std::sync::Arc;

use resolvespec::model::{Field, Record, Reflect, Shape};
use resolvespec::{app, connect, AppState, ModelRegistry, Settings};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

struct Department;

impl Reflect for Department {
    fn shape() -> Shape {
        Shape::record(|| {
            Record::new("Department")
                .table("departments")
                .field(Field::of::<String>("id").primary_key())
                .field(Field::of::<String>("name").not_null())
                .field(Field::of::<Option<String>>("code").unique())
                .field(Field::of::<Vec<Employee>>("employees").has_many("department_id"))
        })
    }
}

struct Employee;

impl Reflect for Employee {
    fn shape() -> Shape {
        Shape::record(|| {
            Record::new("Employee")
                .table("employees")
                .field(Field::of::<String>("id").primary_key())
                .field(Field::of::<String>("first_name").rename("firstName"))
                .field(Field::of::<Option<String>>("email"))
                .field(Field::of::<Option<i32>>("age"))
                .field(Field::of::<Option<String>>("department_id").indexed())
                .field(Field::of::<Option<Department>>("department").belongs_to("department_id"))
        })
    }
}

const BOOTSTRAP: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS test",
    "CREATE TABLE IF NOT EXISTS test.departments (id text PRIMARY KEY, name text NOT NULL, code text UNIQUE)",
    "CREATE TABLE IF NOT EXISTS test.employees (id text PRIMARY KEY, \"firstName\" text NOT NULL, email text, \
     age integer, department_id text REFERENCES test.departments(id))",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resolvespec=info".parse()?))
        .init();
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(panic = %info, %backtrace, "panic");
    }));

    let settings = Settings::from_env()?;
    let db = connect(&settings).await?;
    for sql in BOOTSTRAP {
        db.exec(sql, &[]).await?;
    }

    let registry = Arc::new(ModelRegistry::new());
    registry.register_type::<Department>("test.departments")?;
    registry.register_type::<Employee>("test.employees")?;

    let router = app(AppState::new(registry, db), settings.body_limit);
    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!(backend = %settings.backend, "listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
