//! Repository functions for the `task_cache` table.
//!
//! Rows hold an opaque JSON payload; expiry is enforced on read so an
//! expired row behaves exactly like a missing one.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::DatabaseError;

/// A stored cache row.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub cache_key: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Insert or overwrite the row for `cache_key`.
pub fn upsert_cache_row(conn: &Connection, row: &CacheRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO task_cache (cache_key, payload, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(cache_key) DO UPDATE SET
           payload = excluded.payload,
           created_at = excluded.created_at,
           expires_at = excluded.expires_at",
        params![
            row.cache_key,
            row.payload,
            format_timestamp(row.created_at),
            format_timestamp(row.expires_at),
        ],
    )?;
    Ok(())
}

/// Fetch a row that has not expired as of `now`.
pub fn get_live_cache_row(
    conn: &Connection,
    cache_key: &str,
    now: DateTime<Utc>,
) -> Result<Option<CacheRow>, DatabaseError> {
    let raw = conn
        .query_row(
            "SELECT cache_key, payload, created_at, expires_at
             FROM task_cache WHERE cache_key = ?1",
            params![cache_key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((cache_key, payload, created, expires)) = raw else {
        return Ok(None);
    };

    let row = CacheRow {
        cache_key,
        payload,
        created_at: parse_timestamp("created_at", &created)?,
        expires_at: parse_timestamp("expires_at", &expires)?,
    };

    if row.expires_at <= now {
        return Ok(None);
    }
    Ok(Some(row))
}

/// Delete rows that expired before `now`. Returns the number removed.
pub fn delete_expired_rows(conn: &Connection, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
    // Fixed-width UTC timestamps sort lexically, so a string comparison is enough.
    let affected = conn.execute(
        "DELETE FROM task_cache WHERE expires_at <= ?1",
        params![format_timestamp(now)],
    )?;
    Ok(affected as u64)
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidTimestamp {
            column,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::Duration;

    fn make_row(key: &str, payload: &str, ttl_hours: i64) -> CacheRow {
        let now = Utc::now();
        CacheRow {
            cache_key: key.into(),
            payload: payload.into(),
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
        }
    }

    #[test]
    fn insert_and_retrieve() {
        let conn = open_memory_database().unwrap();
        upsert_cache_row(&conn, &make_row("k1", "[]", 24)).unwrap();

        let row = get_live_cache_row(&conn, "k1", Utc::now()).unwrap().unwrap();
        assert_eq!(row.payload, "[]");
    }

    #[test]
    fn upsert_replaces_existing() {
        let conn = open_memory_database().unwrap();
        upsert_cache_row(&conn, &make_row("k1", "old", 24)).unwrap();
        upsert_cache_row(&conn, &make_row("k1", "new", 24)).unwrap();

        let row = get_live_cache_row(&conn, "k1", Utc::now()).unwrap().unwrap();
        assert_eq!(row.payload, "new");
    }

    #[test]
    fn expired_row_reads_as_missing() {
        let conn = open_memory_database().unwrap();
        upsert_cache_row(&conn, &make_row("k1", "[]", 1)).unwrap();

        let later = Utc::now() + Duration::hours(2);
        assert!(get_live_cache_row(&conn, "k1", later).unwrap().is_none());
    }

    #[test]
    fn missing_returns_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_live_cache_row(&conn, "nope", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn delete_expired_only_removes_stale_rows() {
        let conn = open_memory_database().unwrap();
        upsert_cache_row(&conn, &make_row("stale", "[]", -1)).unwrap();
        upsert_cache_row(&conn, &make_row("fresh", "[]", 24)).unwrap();

        let removed = delete_expired_rows(&conn, Utc::now()).unwrap();
        assert_eq!(removed, 1);
        assert!(get_live_cache_row(&conn, "fresh", Utc::now()).unwrap().is_some());
    }
}
