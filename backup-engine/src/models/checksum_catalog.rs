//! Per-artifact path → checksum catalog.
//!
//! Every artifact stores its *complete* catalog, including incrementals,
//! so the next incremental can diff against its parent without replaying
//! the chain.

use rusqlite::{params, Connection};
use std::collections::HashMap;

/// Relative path → content checksum.
pub type Catalog = HashMap<String, String>;

/// Replaces the stored catalog of `artifact_id` with `catalog`.
pub fn store(conn: &Connection, artifact_id: &str, catalog: &Catalog) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM artifact_checksums WHERE artifact_id = ?", params![artifact_id])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO artifact_checksums (artifact_id, path, checksum) VALUES (?1, ?2, ?3)",
        )?;
        for (path, checksum) in catalog {
            stmt.execute(params![artifact_id, path, checksum])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn load(conn: &Connection, artifact_id: &str) -> anyhow::Result<Catalog> {
    let mut stmt = conn.prepare("SELECT path, checksum FROM artifact_checksums WHERE artifact_id = ?")?;
    let rows = stmt.query_map(params![artifact_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut catalog = Catalog::new();
    for r in rows {
        let (path, checksum) = r?;
        catalog.insert(path, checksum);
    }
    Ok(catalog)
}

pub fn count(conn: &Connection, artifact_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM artifact_checksums WHERE artifact_id = ?",
        params![artifact_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog, days_ago, TestDb};

    #[test]
    fn test_store_replaces_previous_catalog() -> anyhow::Result<()> {
        let db = TestDb::with_target("site")?;
        let conn = db.pool.get()?;
        let artifact = db.completed_full(&conn, "site", days_ago(1))?;

        store(&conn, &artifact.id, &catalog(&[("a", "1"), ("b", "1")]))?;
        store(&conn, &artifact.id, &catalog(&[("a", "2")]))?;

        let loaded = load(&conn, &artifact.id)?;
        assert_eq!(loaded, catalog(&[("a", "2")]));
        assert_eq!(count(&conn, &artifact.id)?, 1);
        Ok(())
    }

    #[test]
    fn test_load_unknown_artifact_is_empty() -> anyhow::Result<()> {
        let db = TestDb::new()?;
        let conn = db.pool.get()?;
        assert!(load(&conn, "nope")?.is_empty());
        Ok(())
    }
}
