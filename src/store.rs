use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "coursetrack.sqlite3";

/// The five top-level collections. Documents are correlated only by id
/// references, so each collection can be fetched and cached independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Users,
    Classes,
    Courses,
    Assignments,
    Progress,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Classes,
        Collection::Courses,
        Collection::Assignments,
        Collection::Progress,
    ];

    fn table(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Classes => "classes",
            Collection::Courses => "courses",
            Collection::Assignments => "assignments",
            Collection::Progress => "progress",
        }
    }
}

/// Query predicates: field equality and field-in-list, conjunctions only.
/// `Eq` against null matches documents where the field is absent as well,
/// which the roster "unassigned students" query relies on.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(path: &str, value: impl Into<Value>) -> Filter {
        Filter::Eq(path.to_string(), value.into())
    }

    pub fn is_in(path: &str, values: Vec<Value>) -> Filter {
        Filter::In(path.to_string(), values)
    }

    fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq(path, expected) => match path_get(doc, path) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            },
            Filter::In(path, allowed) => match path_get(doc, path) {
                Some(actual) => allowed.iter().any(|v| v == actual),
                None => false,
            },
        }
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if needed) the workspace database and ensures every
    /// collection table exists.
    pub fn open(workspace: &Path) -> anyhow::Result<Store> {
        std::fs::create_dir_all(workspace)?;
        let db_path = workspace.join(DB_FILE);
        let conn = Connection::open(db_path)?;

        for collection in Collection::ALL {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {}(
                        id TEXT PRIMARY KEY,
                        data TEXT NOT NULL
                    )",
                    collection.table()
                ),
                [],
            )?;
        }

        // Identity rows live beside the collections but are not documents;
        // they stand in for the external identity provider.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS identities(
                uid TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Store { conn })
    }

    pub(crate) fn raw(&self) -> &Connection {
        &self.conn
    }

    pub fn get(&self, collection: Collection, id: &str) -> anyhow::Result<Option<Value>> {
        doc_get(&self.conn, collection, id)
    }

    pub fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
    ) -> anyhow::Result<Vec<(String, Value)>> {
        doc_query(&self.conn, collection, filters)
    }

    /// Creates a document under a generated id and returns the id.
    pub fn create(&self, collection: Collection, data: &Value) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        doc_put(&self.conn, collection, &id, data)?;
        Ok(id)
    }

    /// Merges `partial` into the document, creating it when absent.
    pub fn set_with_merge(
        &self,
        collection: Collection,
        id: &str,
        partial: &Value,
    ) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        doc_merge(&tx, collection, id, partial)?;
        tx.commit().context("merge commit failed")?;
        Ok(())
    }

    /// Sets a single (possibly dotted) field on an existing document.
    pub fn update_field(
        &self,
        collection: Collection,
        id: &str,
        dotted_path: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        doc_update_field(&tx, collection, id, dotted_path, value)?;
        tx.commit().context("field update commit failed")?;
        Ok(())
    }

    /// Adds `delta` to a numeric field inside a transaction, creating the
    /// document when absent. Returns the stored value after the increment.
    /// Duplicate or concurrent events therefore neither double-count nor
    /// lose increments.
    pub fn atomic_increment(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        delta: i64,
    ) -> anyhow::Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let stored = doc_increment(&tx, collection, id, field, delta)?;
        tx.commit().context("increment commit failed")?;
        Ok(stored)
    }

    pub fn delete(&self, collection: Collection, id: &str) -> anyhow::Result<bool> {
        let n = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE id = ?", collection.table()), [id])?;
        Ok(n > 0)
    }

    /// Runs a read-then-write closure atomically. The closure's error rolls
    /// the whole transaction back.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&StoreTx<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let result = f(&StoreTx { conn: &*tx });
        match result {
            Ok(value) => {
                tx.commit().context("transaction commit failed")?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}

/// The same document operations, scoped to an open transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    pub fn get(&self, collection: Collection, id: &str) -> anyhow::Result<Option<Value>> {
        doc_get(self.conn, collection, id)
    }

    pub fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
    ) -> anyhow::Result<Vec<(String, Value)>> {
        doc_query(self.conn, collection, filters)
    }

    pub fn create(&self, collection: Collection, data: &Value) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        doc_put(self.conn, collection, &id, data)?;
        Ok(id)
    }

    pub fn set_with_merge(
        &self,
        collection: Collection,
        id: &str,
        partial: &Value,
    ) -> anyhow::Result<()> {
        doc_merge(self.conn, collection, id, partial)
    }

    pub fn update_field(
        &self,
        collection: Collection,
        id: &str,
        dotted_path: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        doc_update_field(self.conn, collection, id, dotted_path, value)
    }

    pub fn atomic_increment(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        delta: i64,
    ) -> anyhow::Result<i64> {
        doc_increment(self.conn, collection, id, field, delta)
    }

    pub fn delete(&self, collection: Collection, id: &str) -> anyhow::Result<bool> {
        let n = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE id = ?", collection.table()), [id])?;
        Ok(n > 0)
    }
}

fn doc_get(conn: &Connection, collection: Collection, id: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT data FROM {} WHERE id = ?", collection.table()),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("corrupt document {}/{}", collection.table(), id))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn doc_query(
    conn: &Connection,
    collection: Collection,
    filters: &[Filter],
) -> anyhow::Result<Vec<(String, Value)>> {
    // Collections are small enough to fetch in full; predicates are applied
    // over the parsed documents.
    let mut stmt = conn.prepare(&format!(
        "SELECT id, data FROM {} ORDER BY id",
        collection.table()
    ))?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let data: String = row.get(1)?;
            Ok((id, data))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    for (id, text) in rows {
        let doc: Value = serde_json::from_str(&text)
            .with_context(|| format!("corrupt document {}/{}", collection.table(), id))?;
        if filters.iter().all(|f| f.matches(&doc)) {
            out.push((id, doc));
        }
    }
    Ok(out)
}

fn doc_put(conn: &Connection, collection: Collection, id: &str, data: &Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(data).context("serialize document")?;
    conn.execute(
        &format!(
            "INSERT INTO {}(id, data) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            collection.table()
        ),
        (id, &text),
    )?;
    Ok(())
}

fn doc_merge(
    conn: &Connection,
    collection: Collection,
    id: &str,
    partial: &Value,
) -> anyhow::Result<()> {
    let mut doc = doc_get(conn, collection, id)?.unwrap_or_else(|| Value::Object(Default::default()));
    merge_value(&mut doc, partial);
    doc_put(conn, collection, id, &doc)
}

fn doc_update_field(
    conn: &Connection,
    collection: Collection,
    id: &str,
    dotted_path: &str,
    value: Value,
) -> anyhow::Result<()> {
    let Some(mut doc) = doc_get(conn, collection, id)? else {
        return Err(anyhow!("document {}/{} not found", collection.table(), id));
    };
    path_set(&mut doc, dotted_path, value);
    doc_put(conn, collection, id, &doc)
}

fn doc_increment(
    conn: &Connection,
    collection: Collection,
    id: &str,
    field: &str,
    delta: i64,
) -> anyhow::Result<i64> {
    let mut doc = doc_get(conn, collection, id)?.unwrap_or_else(|| Value::Object(Default::default()));
    let current = doc.get(field).and_then(|v| v.as_i64()).unwrap_or(0);
    let next = current + delta;
    path_set(&mut doc, field, Value::from(next));
    doc_put(conn, collection, id, &doc)?;
    Ok(next)
}

/// Recursive object merge: objects merge key-by-key, anything else replaces.
fn merge_value(target: &mut Value, partial: &Value) {
    match (target, partial) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, incoming) => *slot = incoming.clone(),
    }
}

fn path_get<'v>(doc: &'v Value, dotted_path: &str) -> Option<&'v Value> {
    let mut current = doc;
    for segment in dotted_path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Dotted-path set. Intermediate segments that are missing or not objects
/// are replaced with fresh objects, mirroring the document store's merge
/// semantics for dotted field paths.
fn path_set(doc: &mut Value, dotted_path: &str, value: Value) {
    let mut current = doc;
    let mut pending = Some(value);
    let mut segments = dotted_path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            if let Some(v) = pending.take() {
                map.insert(segment.to_string(), v);
            }
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
}
