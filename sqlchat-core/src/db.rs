use crate::config::DatabaseConfig;
use crate::error::SqlChatError;
use crate::models::SEED_EMPLOYEES;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::str::FromStr;

const CREATE_EMPLOYEES: &str = r#"
CREATE TABLE IF NOT EXISTS Employees (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    Name TEXT NOT NULL,
    Age INTEGER,
    Department TEXT,
    Salary REAL,
    Mobile TEXT,
    Email TEXT
)
"#;

/// Outcome of a bootstrap run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub seeded: bool,
    pub employee_count: i64,
}

/// Result set of an arbitrary statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}

/// Create the `Employees` schema and seed rows if absent.
///
/// Runs in a single transaction so a failure never leaves a half-built schema.
/// Safe to call on every start.
pub async fn bootstrap(pool: &SqlitePool) -> Result<BootstrapReport, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(CREATE_EMPLOYEES).execute(&mut *tx).await?;

    let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM Employees")
        .fetch_one(&mut *tx)
        .await?;

    let seeded = existing == 0;
    if seeded {
        for employee in SEED_EMPLOYEES {
            sqlx::query(
                "INSERT INTO Employees (Name, Age, Department, Salary, Mobile, Email) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(employee.name)
            .bind(employee.age)
            .bind(employee.department)
            .bind(employee.salary)
            .bind(employee.mobile)
            .bind(employee.email)
            .execute(&mut *tx)
            .await?;
        }
    }

    let (employee_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM Employees")
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    if seeded {
        tracing::info!(rows = employee_count, "Seeded Employees table");
    }

    Ok(BootstrapReport {
        seeded,
        employee_count,
    })
}

/// Open the pool and bootstrap the schema; what the server runs at startup.
pub async fn open_store(
    config: &DatabaseConfig,
) -> Result<(SqlitePool, BootstrapReport), SqlChatError> {
    let pool = create_pool(config).await?;
    let report = bootstrap(&pool).await?;
    Ok((pool, report))
}

pub async fn health_check(pool: &SqlitePool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT sqlite_version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// User table names in name order.
pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Run any statement and collect its rows as JSON scalars.
///
/// Statements that return no rows (writes, DDL) yield an empty result set.
pub async fn execute(pool: &SqlitePool, statement: &str) -> Result<QueryRows, sqlx::Error> {
    let rows = sqlx::query(statement).fetch_all(pool).await?;

    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| cell_value(row, i))
                .collect::<Result<Vec<Value>, sqlx::Error>>()
        })
        .collect::<Result<Vec<Vec<Value>>, sqlx::Error>>()?;

    Ok(QueryRows { columns, rows })
}

fn cell_value(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
        "REAL" => Value::from(row.try_get::<f64, _>(index)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(index)?;
            Value::from(format!("<blob {} bytes>", bytes.len()))
        }
        // TEXT plus declared affinities such as NUMERIC or DATETIME
        _ => Value::from(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("company.db").display());
        let pool = create_pool(&DatabaseConfig {
            url,
            max_connections: 2,
        })
        .await
        .unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_bootstrap_creates_schema_and_seeds() {
        let (_dir, pool) = temp_pool().await;

        let report = bootstrap(&pool).await.unwrap();
        assert!(report.seeded);
        assert_eq!(report.employee_count, SEED_EMPLOYEES.len() as i64);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let (_dir, pool) = temp_pool().await;

        let first = bootstrap(&pool).await.unwrap();
        let second = bootstrap(&pool).await.unwrap();

        assert!(!second.seeded, "second run must not seed again");
        assert_eq!(first.employee_count, second.employee_count);
        assert_eq!(list_tables(&pool).await.unwrap(), vec!["Employees".to_string()]);
    }

    #[tokio::test]
    async fn test_bootstrap_does_not_reseed_after_rows_change() {
        let (_dir, pool) = temp_pool().await;
        bootstrap(&pool).await.unwrap();

        sqlx::query("DELETE FROM Employees WHERE Name = 'Frank White'")
            .execute(&pool)
            .await
            .unwrap();

        let report = bootstrap(&pool).await.unwrap();
        assert!(!report.seeded);
        assert_eq!(report.employee_count, SEED_EMPLOYEES.len() as i64 - 1);
    }

    #[tokio::test]
    async fn test_execute_returns_typed_cells() {
        let (_dir, pool) = temp_pool().await;
        bootstrap(&pool).await.unwrap();

        let result = execute(
            &pool,
            "SELECT Name, Age, Salary, NULL AS Missing FROM Employees WHERE Name = 'Alice Smith'",
        )
        .await
        .unwrap();

        assert_eq!(result.columns, vec!["Name", "Age", "Salary", "Missing"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], Value::from("Alice Smith"));
        assert_eq!(result.rows[0][1], Value::from(30));
        assert_eq!(result.rows[0][2], Value::from(90000.0));
        assert_eq!(result.rows[0][3], Value::Null);
    }

    #[tokio::test]
    async fn test_execute_write_statement_returns_empty_set() {
        let (_dir, pool) = temp_pool().await;
        bootstrap(&pool).await.unwrap();

        let result = execute(&pool, "UPDATE Employees SET Age = Age + 1 WHERE Department = 'HR'")
            .await
            .unwrap();
        assert!(result.rows.is_empty());

        let (age,): (i64,) = sqlx::query_as("SELECT Age FROM Employees WHERE Department = 'HR'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(age, 42);
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_sql() {
        let (_dir, pool) = temp_pool().await;
        bootstrap(&pool).await.unwrap();

        assert!(execute(&pool, "SELEC nonsense FROM").await.is_err());
        assert!(execute(&pool, "SELECT * FROM Missing").await.is_err());
    }

    #[tokio::test]
    async fn test_open_store_bootstraps() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("company.db").display()),
            max_connections: 2,
        };

        let (pool, report) = open_store(&config).await.unwrap();
        assert!(report.seeded);
        assert_eq!(list_tables(&pool).await.unwrap(), vec!["Employees".to_string()]);
    }

    #[tokio::test]
    async fn test_open_store_reports_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!(
                "sqlite://{}",
                dir.path().join("missing").join("company.db").display()
            ),
            max_connections: 1,
        };

        let err = open_store(&config).await.unwrap_err();
        assert!(matches!(err, SqlChatError::Database(_)));
        assert!(err.to_string().starts_with("Database error"));
    }

    #[tokio::test]
    async fn test_health_check_reports_version() {
        let (_dir, pool) = temp_pool().await;
        let version = health_check(&pool).await.unwrap();
        assert!(version.starts_with('3'));
    }
}
