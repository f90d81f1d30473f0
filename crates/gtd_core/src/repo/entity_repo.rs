//! Entity record store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist one `StoredRecord` per entity plus its task-context links.
//! - Keep SQL details and ordering behavior inside the repository boundary.
//!
//! # Invariants
//! - Listing is deterministic: kind rank (parents before children), then
//!   `sort_order ASC, uuid ASC`.
//! - `sort_order` is per kind. An upsert keeps it while the parent is
//!   unchanged and appends otherwise.
//! - Each upsert rewrites the record and its context links in one transaction.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::filter::term::now_epoch_ms;
use crate::model::entity::{EntityId, EntityKind};
use crate::model::tree::{ErrorKind, TreeError};
use crate::repo::record::StoredRecord;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Result type used by record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from record store and persistence adapter operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Stored data cannot be turned into a valid entity.
    MalformedRecord(String),
    /// Replaying a record into the tree failed.
    Tree(TreeError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl StoreError {
    /// Domain classification; `None` for storage transport failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::MalformedRecord(_) => Some(ErrorKind::MalformedRecord),
            Self::Tree(err) => Some(err.kind()),
            Self::Db(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::MalformedRecord(message) => write!(f, "malformed record: {message}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "record store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "record store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "record store requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::MalformedRecord(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<TreeError> for StoreError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

/// Persistence contract used by the tree adapter.
pub trait RecordStore {
    /// Inserts or replaces one record (and its context links).
    fn upsert(&self, record: &StoredRecord) -> StoreResult<()>;
    /// Deletes one record. Returns whether it existed.
    fn delete(&self, id: EntityId) -> StoreResult<bool>;
    /// Lists every record in load order; malformed rows come back as `Err`.
    fn list(&self) -> StoreResult<Vec<StoreResult<StoredRecord>>>;
    /// Counts stored records of `kind`.
    fn count(&self, kind: EntityKind) -> StoreResult<usize>;
}

/// SQLite-backed record store. Owns its connection.
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore").finish_non_exhaustive()
    }
}

impl RecordStore for SqliteRecordStore {
    fn upsert(&self, record: &StoredRecord) -> StoreResult<()> {
        record.validate()?;

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let id_text = record.id.to_string();
        let parent_text = record.parent.map(|parent| parent.to_string());
        let now = now_epoch_ms();

        let existing: Option<(Option<String>, i64)> = tx
            .query_row(
                "SELECT parent_uuid, sort_order FROM entities WHERE uuid = ?1;",
                [&id_text],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let sort_order = match existing {
            Some((stored_parent, order)) if stored_parent == parent_text => order,
            _ => next_sort_order(&tx, record.kind)?,
        };

        tx.execute(
            "INSERT INTO entities (
                uuid, kind, title, parent_uuid, notes, start_at, due_at,
                complete, waiting, visible, sort_order, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             ON CONFLICT(uuid) DO UPDATE SET
                kind = excluded.kind,
                title = excluded.title,
                parent_uuid = excluded.parent_uuid,
                notes = excluded.notes,
                start_at = excluded.start_at,
                due_at = excluded.due_at,
                complete = excluded.complete,
                waiting = excluded.waiting,
                visible = excluded.visible,
                sort_order = excluded.sort_order,
                updated_at = excluded.updated_at;",
            params![
                id_text,
                record.kind.as_str(),
                record.title,
                parent_text,
                record.notes,
                record.start_at,
                record.due_at,
                bool_to_int(record.complete),
                bool_to_int(record.waiting),
                bool_to_int(record.visible),
                sort_order,
                now,
            ],
        )?;

        tx.execute("DELETE FROM task_contexts WHERE task_uuid = ?1;", [&id_text])?;
        for (position, context) in record.contexts.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO task_contexts (task_uuid, context_uuid, position)
                 VALUES (?1, ?2, ?3);",
                params![id_text, context.to_string(), position as i64],
            )?;
        }
        tx.commit()?;

        debug!(
            "event=record_upsert module=repo status=ok kind={} id={} sort_order={}",
            record.kind, record.id, sort_order
        );
        Ok(())
    }

    fn delete(&self, id: EntityId) -> StoreResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM entities WHERE uuid = ?1;", [id.to_string()])?;
        debug!(
            "event=record_delete module=repo status=ok id={} existed={}",
            id,
            changed > 0
        );
        Ok(changed > 0)
    }

    fn list(&self) -> StoreResult<Vec<StoreResult<StoredRecord>>> {
        let contexts = load_context_links(&self.conn)?;

        let mut stmt = self.conn.prepare(
            "SELECT uuid, kind, title, parent_uuid, notes, start_at, due_at,
                    complete, waiting, visible
             FROM entities
             ORDER BY CASE kind
                        WHEN 'context' THEN 0
                        WHEN 'realm' THEN 1
                        WHEN 'area' THEN 2
                        WHEN 'project' THEN 3
                        ELSE 4
                      END ASC,
                      sort_order ASC,
                      uuid ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row, &contexts));
        }
        Ok(records)
    }

    fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE kind = ?1;",
            [kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

type ContextLinks = HashMap<String, Vec<String>>;

fn load_context_links(conn: &Connection) -> StoreResult<ContextLinks> {
    let mut stmt = conn.prepare(
        "SELECT task_uuid, context_uuid
         FROM task_contexts
         ORDER BY task_uuid ASC, position ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut links = ContextLinks::new();
    while let Some(row) = rows.next()? {
        let task: String = row.get(0)?;
        let context: String = row.get(1)?;
        links.entry(task).or_default().push(context);
    }
    Ok(links)
}

fn parse_record_row(row: &Row<'_>, contexts: &ContextLinks) -> StoreResult<StoredRecord> {
    let id_text: String = row.get("uuid")?;
    let id = parse_uuid(&id_text, "entities.uuid")?;

    let kind_text: String = row.get("kind")?;
    let kind = EntityKind::parse(&kind_text).ok_or_else(|| {
        StoreError::MalformedRecord(format!("invalid kind `{kind_text}` in entities.kind"))
    })?;

    let parent = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "entities.parent_uuid"))
        .transpose()?;

    let context_ids = contexts
        .get(&id_text)
        .map_or(&[][..], Vec::as_slice)
        .iter()
        .map(|value| parse_uuid(value, "task_contexts.context_uuid"))
        .collect::<StoreResult<Vec<_>>>()?;

    let record = StoredRecord {
        id,
        kind,
        title: row.get("title")?,
        parent,
        notes: row.get("notes")?,
        start_at: row.get("start_at")?,
        due_at: row.get("due_at")?,
        complete: parse_flag(row, "complete")?,
        waiting: parse_flag(row, "waiting")?,
        visible: parse_flag(row, "visible")?,
        contexts: context_ids,
    };
    record.validate()?;
    Ok(record)
}

fn parse_flag(row: &Row<'_>, column: &'static str) -> StoreResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::MalformedRecord(format!(
            "invalid flag value `{other}` in entities.{column}"
        ))),
    }
}

fn parse_uuid(value: &str, column: &'static str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::MalformedRecord(format!("invalid uuid `{value}` in {column}")))
}

fn next_sort_order(conn: &Connection, kind: EntityKind) -> StoreResult<i64> {
    let next = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1
         FROM entities
         WHERE kind = ?1;",
        [kind.as_str()],
        |row| row.get(0),
    )?;
    Ok(next)
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let required: [(&'static str, &[&'static str]); 2] = [
        (
            "entities",
            &[
                "uuid",
                "kind",
                "title",
                "parent_uuid",
                "notes",
                "start_at",
                "due_at",
                "complete",
                "waiting",
                "visible",
                "sort_order",
                "created_at",
                "updated_at",
            ],
        ),
        ("task_contexts", &["task_uuid", "context_uuid", "position"]),
    ];
    for (table, columns) in required {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
