use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::error::{Result, StoreError};

/// A value type that can live in a [`KvStore`].
///
/// `KIND` and `SCHEMA_VERSION` are written next to every value and checked on
/// read, so a file written for another type or an older layout fails loudly
/// instead of decoding into garbage.
pub trait StoredValue: Serialize + DeserializeOwned {
    const KIND: &'static str;
    const SCHEMA_VERSION: u32;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, V> {
    kind: &'a str,
    version: u32,
    value: &'a V,
}

#[derive(Deserialize)]
struct Envelope {
    kind: String,
    version: u32,
    value: serde_json::Value,
}

/// Durable string-keyed store backed by a single SQLite file.
///
/// Each `get`/`set`/`delete` is atomic on its own. A `get` followed by a
/// `set` is not: values come back as independent copies, and nothing is
/// written until `set` is called.
pub struct KvStore<V> {
    conn: Connection,
    path: Option<PathBuf>,
    _value: PhantomData<fn() -> V>,
}

impl<V: StoredValue> KvStore<V> {
    /// Open (or create) the store file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        initialize(&conn)?;
        tracing::debug!(path = %path.display(), kind = V::KIND, "store opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            _value: PhantomData,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Self {
            conn,
            path: None,
            _value: PhantomData,
        })
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Result<Option<V>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;

        raw.map(|text| decode(key, &text)).transpose()
    }

    /// Write `value` under `key`, replacing any previous value.
    pub fn set(&self, key: &str, value: &V) -> Result<()> {
        let envelope = EnvelopeRef {
            kind: V::KIND,
            version: V::SCHEMA_VERSION,
            value,
        };
        let text = serde_json::to_string(&envelope).map_err(StoreError::Encode)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, text],
        )?;
        Ok(())
    }

    /// Remove `key`. Deleting an absent key is an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        if removed == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Close the backing file. Dropping the store also closes it, but
    /// this surfaces errors from the final flush.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        tracing::debug!(kind = V::KIND, "store closed");
        Ok(())
    }
}

fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn decode<V: StoredValue>(key: &str, text: &str) -> Result<V> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })?;
    if envelope.kind != V::KIND || envelope.version != V::SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            key: key.to_string(),
            kind: envelope.kind,
            version: envelope.version,
        });
    }
    serde_json::from_value(envelope.value).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}
