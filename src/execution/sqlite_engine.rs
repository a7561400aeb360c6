//! SQLite Engine
//!
//! `DataStore` backed by a rusqlite connection. Statements run on the blocking
//! pool so a slow query never stalls the async runtime. Dropping an `execute`
//! future (a timeout, for instance) interrupts the statement it started, so
//! the connection is free for the next query.

use crate::error::{PipelineError, Result};
use crate::execution::engine::DataStore;
use crate::execution::result::RowSet;
use crate::schema_rag::catalog::{ColumnDescriptor, SchemaCatalog, TableDescriptor};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            PipelineError::Execution(format!(
                "Failed to open database {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Open without write access; the connection rejects any mutating statement
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            PipelineError::Execution(format!(
                "Failed to open database {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        }
    }

    /// Run a batch of statements (schema setup, seeding)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run a closure with exclusive access to the connection
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Execution("Database connection lock poisoned".to_string()))
    }

    /// Build a catalog from `sqlite_master` and `PRAGMA table_info`, in creation order.
    /// With `samples > 0`, text columns get up to that many distinct example values.
    pub fn introspect_catalog(&self, samples: usize) -> Result<SchemaCatalog> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
        )?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let mut info = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&name)))?;
            let mut columns: Vec<ColumnDescriptor> = info
                .query_map([], |row| {
                    Ok(ColumnDescriptor::new(
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<_, _>>()?;

            if samples > 0 {
                for column in columns.iter_mut().filter(|c| is_text_type(&c.data_type)) {
                    let sql = format!(
                        "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col} LIMIT {n}",
                        col = quote_ident(&column.name),
                        table = quote_ident(&name),
                        n = samples
                    );
                    let mut sample_stmt = conn.prepare(&sql)?;
                    column.sample_values = sample_stmt
                        .query_map([], |row| Ok(render_sample(row.get_ref(0)?)))?
                        .collect::<std::result::Result<_, _>>()?;
                }
            }

            tables.push(TableDescriptor::new(name, columns));
        }

        info!("Introspected {} tables", tables.len());
        Ok(SchemaCatalog::new(tables))
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, sql: &str) -> Result<RowSet> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let state = Arc::new(Mutex::new(QueryState::Queued));
        let _cancel = CancelOnDrop {
            state: Arc::clone(&state),
            interrupt: Arc::clone(&self.interrupt),
        };

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| {
                PipelineError::Execution("Database connection lock poisoned".to_string())
            })?;
            {
                let mut state = lock_state(&state)?;
                if *state == QueryState::Abandoned {
                    return Err(PipelineError::Execution(
                        "query cancelled before it started".to_string(),
                    ));
                }
                *state = QueryState::Running;
            }
            let result = run_query(&conn, &sql);
            // Mark finished while the connection is still held, so a late
            // interrupt can never land on someone else's statement.
            *lock_state(&state)? = QueryState::Finished;
            result.map_err(|e| PipelineError::Execution(e.to_string()))
        })
        .await
        .map_err(|e| PipelineError::Execution(format!("Query task failed: {}", e)))?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Queued,
    Running,
    Finished,
    Abandoned,
}

fn lock_state(state: &Mutex<QueryState>) -> Result<std::sync::MutexGuard<'_, QueryState>> {
    state
        .lock()
        .map_err(|_| PipelineError::Execution("Query state lock poisoned".to_string()))
}

/// Held by an `execute` future. If the future is dropped before the query
/// finishes, a queued query is skipped and a running one is interrupted.
struct CancelOnDrop {
    state: Arc<Mutex<QueryState>>,
    interrupt: Arc<InterruptHandle>,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match *state {
            QueryState::Queued => *state = QueryState::Abandoned,
            QueryState::Running => {
                debug!("Interrupting abandoned query");
                self.interrupt.interrupt();
                *state = QueryState::Abandoned;
            }
            QueryState::Finished | QueryState::Abandoned => {}
        }
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<RowSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_json(row.get_ref(i)?));
        }
        rows.push(values);
    }

    Ok(RowSet::new(columns, rows))
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn render_sample(value: ValueRef<'_>) -> String {
    match to_json(value) {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_text_type(data_type: &str) -> bool {
    let upper = data_type.to_uppercase();
    upper.contains("TEXT") || upper.contains("CHAR") || upper.contains("CLOB")
}
