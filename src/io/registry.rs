//! Registry store: employees, plate mappings and the access log
//!
//! ## Tables
//! - employees: id, name, position
//! - plates: plate_number (PK, normalized) -> employee_id, cascades on delete
//! - access_logs: append-only; employee_id is intentionally not a foreign key
//!   so deleting an employee never rewrites history (such rows read back as
//!   "Visitor")

use crate::domain::error::RegistryError;
use crate::domain::types::{
    normalize_plate, AccessAction, AccessLogEntry, AccessLogView, EmployeeId, EmployeeWithPlate,
    NewEmployee, PlateOwner,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lookup and append operations consumed by the decision engine, plus the
/// admin listing/CRUD used by the HTTP API
#[async_trait]
pub trait Registry: Send + Sync {
    async fn find_employee_by_plate(&self, plate: &str)
        -> Result<Option<PlateOwner>, RegistryError>;

    async fn append_log(&self, entry: &AccessLogEntry) -> Result<(), RegistryError>;

    /// Newest first
    async fn list_recent_logs(&self, limit: usize) -> Result<Vec<AccessLogView>, RegistryError>;

    async fn list_employees_with_plates(&self) -> Result<Vec<EmployeeWithPlate>, RegistryError>;

    /// Plate is normalized; an empty plate after normalization registers no mapping
    async fn add_employee(&self, employee: NewEmployee)
        -> Result<EmployeeWithPlate, RegistryError>;

    /// Removes the employee and its plate mapping
    async fn delete_employee(&self, id: EmployeeId) -> Result<(), RegistryError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    position TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS plates (
    plate_number TEXT PRIMARY KEY,
    employee_id INTEGER NOT NULL,
    FOREIGN KEY (employee_id) REFERENCES employees (id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS access_logs (
    log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id INTEGER,
    plate_number TEXT,
    action TEXT NOT NULL DEFAULT 'ENTRY',
    details TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_access_logs_timestamp ON access_logs (timestamp);
"#;

impl ToSql for AccessAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AccessAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        AccessAction::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown action {s}").into()))
    }
}

/// SQLite-backed registry. Calls run on the blocking pool behind one connection.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    /// Open (or create) the database file and apply the schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let registry = Self::init(conn)?;
        info!(path = %path.display(), "registry_opened");
        Ok(registry)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RegistryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn find_employee_by_plate(
        &self,
        plate: &str,
    ) -> Result<Option<PlateOwner>, RegistryError> {
        let plate = normalize_plate(plate);
        self.with_conn(move |conn| {
            let owner = conn
                .query_row(
                    "SELECT p.employee_id, e.name
                     FROM plates p
                     JOIN employees e ON p.employee_id = e.id
                     WHERE p.plate_number = ?1",
                    params![plate],
                    |row| {
                        Ok(PlateOwner { employee_id: EmployeeId(row.get(0)?), name: row.get(1)? })
                    },
                )
                .optional()?;
            Ok(owner)
        })
        .await
    }

    async fn append_log(&self, entry: &AccessLogEntry) -> Result<(), RegistryError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO access_logs (employee_id, plate_number, action, details, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.employee_id.map(|id| id.0),
                    entry.plate_text,
                    entry.action,
                    entry.detail,
                    entry.timestamp,
                ],
            )?;
            debug!(
                action = %entry.action.as_str(),
                plate = ?entry.plate_text,
                "access_log_appended"
            );
            Ok(())
        })
        .await
    }

    async fn list_recent_logs(&self, limit: usize) -> Result<Vec<AccessLogView>, RegistryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT a.timestamp, IFNULL(e.name, 'Visitor'), a.plate_number, a.action
                 FROM access_logs a
                 LEFT JOIN employees e ON a.employee_id = e.id
                 ORDER BY a.timestamp DESC, a.log_id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok(AccessLogView {
                        timestamp: row.get(0)?,
                        name: row.get(1)?,
                        plate_text: row.get(2)?,
                        action: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn list_employees_with_plates(&self) -> Result<Vec<EmployeeWithPlate>, RegistryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.name, e.position, p.plate_number
                 FROM employees e
                 LEFT JOIN plates p ON e.id = p.employee_id
                 ORDER BY e.id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(EmployeeWithPlate {
                        id: EmployeeId(row.get(0)?),
                        name: row.get(1)?,
                        position: row.get(2)?,
                        plate: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn add_employee(
        &self,
        employee: NewEmployee,
    ) -> Result<EmployeeWithPlate, RegistryError> {
        let plate =
            employee.plate.as_deref().map(normalize_plate).filter(|plate| !plate.is_empty());

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO employees (name, position) VALUES (?1, ?2)",
                params![employee.name, employee.position],
            )?;
            let id = EmployeeId(tx.last_insert_rowid());

            if let Some(plate) = &plate {
                tx.execute(
                    "INSERT INTO plates (plate_number, employee_id) VALUES (?1, ?2)",
                    params![plate, id.0],
                )
                .map_err(|e| match RegistryError::from(e) {
                    RegistryError::Conflict(_) => {
                        RegistryError::Conflict(format!("plate {plate} is already registered"))
                    }
                    other => other,
                })?;
            }
            tx.commit()?;

            info!(employee_id = %id, plate = ?plate, "employee_added");
            Ok(EmployeeWithPlate {
                id,
                name: employee.name,
                position: employee.position,
                plate,
            })
        })
        .await
    }

    async fn delete_employee(&self, id: EmployeeId) -> Result<(), RegistryError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM plates WHERE employee_id = ?1", params![id.0])?;
            let deleted = tx.execute("DELETE FROM employees WHERE id = ?1", params![id.0])?;
            if deleted == 0 {
                return Err(RegistryError::NotFound(format!("employee {id}")));
            }
            tx.commit()?;

            info!(employee_id = %id, "employee_deleted");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn new_employee(name: &str, plate: Option<&str>) -> NewEmployee {
        NewEmployee {
            name: name.to_string(),
            position: "Engineer".to_string(),
            plate: plate.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_add_and_find_normalizes_plate() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let added = registry.add_employee(new_employee("Ana", Some("ab-12 34"))).await.unwrap();
        assert_eq!(added.plate.as_deref(), Some("AB1234"));

        let owner = registry.find_employee_by_plate("AB1234").await.unwrap().unwrap();
        assert_eq!(owner.employee_id, added.id);
        assert_eq!(owner.name, "Ana");

        // Lookup input is normalized too
        assert!(registry.find_employee_by_plate("ab 1234").await.unwrap().is_some());
        assert!(registry.find_employee_by_plate("ZZZ999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_without_plate() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let added = registry.add_employee(new_employee("Bo", Some(" - "))).await.unwrap();
        assert_eq!(added.plate, None);

        let all = registry.list_employees_with_plates().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].plate, None);
    }

    #[tokio::test]
    async fn test_duplicate_plate_conflicts_and_rolls_back() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry.add_employee(new_employee("Ana", Some("XYZ123"))).await.unwrap();

        let err = registry.add_employee(new_employee("Bo", Some("xyz-123"))).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));

        let all = registry.list_employees_with_plates().await.unwrap();
        assert_eq!(all.len(), 1, "employee row must not survive a plate conflict");
    }

    #[tokio::test]
    async fn test_delete_cascades_plate() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let added = registry.add_employee(new_employee("Ana", Some("XYZ123"))).await.unwrap();

        registry.delete_employee(added.id).await.unwrap();
        assert!(registry.find_employee_by_plate("XYZ123").await.unwrap().is_none());
        assert!(registry.list_employees_with_plates().await.unwrap().is_empty());

        // Plate can be registered again afterwards
        registry.add_employee(new_employee("Bo", Some("XYZ123"))).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let err = registry.delete_employee(EmployeeId(42)).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first_with_visitor() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let ana = registry.add_employee(new_employee("Ana", Some("XYZ123"))).await.unwrap();

        let mut entry = AccessLogEntry::entry(ana.id, "XYZ123");
        entry.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        registry.append_log(&entry).await.unwrap();

        let mut denied = AccessLogEntry::denied("QQQ111");
        denied.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        registry.append_log(&denied).await.unwrap();

        let logs = registry.list_recent_logs(20).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, AccessAction::Denied);
        assert_eq!(logs[0].name, "Visitor");
        assert_eq!(logs[0].plate_text.as_deref(), Some("QQQ111"));
        assert_eq!(logs[1].action, AccessAction::Entry);
        assert_eq!(logs[1].name, "Ana");
        assert_eq!(logs[1].timestamp, entry.timestamp);

        let limited = registry.list_recent_logs(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].action, AccessAction::Denied);
    }

    #[tokio::test]
    async fn test_logs_survive_employee_delete() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let ana = registry.add_employee(new_employee("Ana", Some("XYZ123"))).await.unwrap();
        registry.append_log(&AccessLogEntry::entry(ana.id, "XYZ123")).await.unwrap();

        registry.delete_employee(ana.id).await.unwrap();

        let logs = registry.list_recent_logs(20).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].name, "Visitor");
        assert_eq!(logs[0].action, AccessAction::Entry);
    }

    #[tokio::test]
    async fn test_open_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gate.db");

        let registry = SqliteRegistry::open(&path).unwrap();
        registry.add_employee(new_employee("Ana", Some("XYZ123"))).await.unwrap();
        drop(registry);

        let reopened = SqliteRegistry::open(&path).unwrap();
        assert!(reopened.find_employee_by_plate("XYZ123").await.unwrap().is_some());
    }
}
