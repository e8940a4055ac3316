use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

const LEDGER_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processed_lemmas (
    lemma TEXT PRIMARY KEY,
    processed_at_unix INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_processed_lemmas_processed_at ON processed_lemmas(processed_at_unix);
"#;

pub struct Ledger {
    connection: Connection,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create ledger parent directory {}",
                    parent.display()
                )
            })?;
        }
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Self::with_connection(connection)
    }

    pub fn in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().context("failed to open in-memory ledger")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(LEDGER_SCHEMA_SQL)
            .context("failed to initialize ledger schema")?;
        Ok(Self { connection })
    }

    pub fn mark_processed(&self, lemma: &str, processed_at_unix: i64) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO processed_lemmas (lemma, processed_at_unix) VALUES (?1, ?2)
                ON CONFLICT(lemma) DO UPDATE SET processed_at_unix = excluded.processed_at_unix",
                params![lemma, processed_at_unix],
            )
            .with_context(|| format!("failed to upsert ledger row for {lemma}"))?;
        Ok(())
    }

    pub fn mark_processed_now(&self, lemma: &str) -> Result<()> {
        self.mark_processed(lemma, chrono::Utc::now().timestamp())
    }

    pub fn processed_at(&self, lemma: &str) -> Result<Option<i64>> {
        let mut statement = self
            .connection
            .prepare("SELECT processed_at_unix FROM processed_lemmas WHERE lemma = ?1 LIMIT 1")
            .context("failed to prepare ledger query")?;
        let mut rows = statement
            .query([lemma])
            .with_context(|| format!("failed to read ledger row for {lemma}"))?;
        match rows.next().context("failed to decode ledger row")? {
            Some(row) => Ok(Some(row.get(0).context("failed to decode ledger timestamp")?)),
            None => Ok(None),
        }
    }

    fn load_all(&self) -> Result<HashMap<String, i64>> {
        let mut statement = self
            .connection
            .prepare("SELECT lemma, processed_at_unix FROM processed_lemmas")
            .context("failed to prepare ledger scan")?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .context("failed to scan ledger")?;
        let mut out = HashMap::new();
        for row in rows {
            let (lemma, processed_at) = row.context("failed to decode ledger row")?;
            out.insert(lemma, processed_at);
        }
        Ok(out)
    }

    /// Never-processed lemmas first in input order, then processed ones
    /// oldest first. Duplicates keep their first position.
    pub fn order_by_ledger(&self, lemmas: Vec<String>) -> Result<Vec<String>> {
        let processed = self.load_all()?;
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        let mut stale = Vec::new();
        for lemma in lemmas {
            if !seen.insert(lemma.clone()) {
                continue;
            }
            match processed.get(&lemma) {
                Some(at) => stale.push((*at, lemma)),
                None => fresh.push(lemma),
            }
        }
        stale.sort_by_key(|(at, _)| *at);
        fresh.extend(stale.into_iter().map(|(_, lemma)| lemma));
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::Ledger;

    fn lemmas(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn upsert_is_idempotent() {
        let ledger = Ledger::in_memory().expect("ledger");
        assert_eq!(ledger.processed_at("RE:Aal").expect("read"), None);
        ledger.mark_processed("RE:Aal", 10).expect("mark");
        ledger.mark_processed("RE:Aal", 10).expect("mark again");
        assert_eq!(ledger.processed_at("RE:Aal").expect("read"), Some(10));
        ledger.mark_processed("RE:Aal", 20).expect("update");
        assert_eq!(ledger.processed_at("RE:Aal").expect("read"), Some(20));
    }

    #[test]
    fn unprocessed_lemmas_come_first() {
        let ledger = Ledger::in_memory().expect("ledger");
        ledger.mark_processed("RE:B", 300).expect("mark");
        ledger.mark_processed("RE:C", 100).expect("mark");
        let ordered = ledger
            .order_by_ledger(lemmas(&["RE:B", "RE:A", "RE:C", "RE:D", "RE:A"]))
            .expect("order");
        assert_eq!(ordered, lemmas(&["RE:A", "RE:D", "RE:C", "RE:B"]));
    }

    #[test]
    fn ledger_persists_on_disk() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state").join("ledger.db");
        {
            let ledger = Ledger::open(&path).expect("open");
            ledger.mark_processed_now("RE:Aal").expect("mark");
        }
        let reopened = Ledger::open(&path).expect("reopen");
        assert!(reopened.processed_at("RE:Aal").expect("read").is_some());
    }
}
