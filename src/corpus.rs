use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{debug, info};

use crate::model::{CorpusEntry, CorpusStats, ProblemRecord};
use crate::util::{now_utc_string, sha256_hex};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_PERSIST_THRESHOLD: f64 = 60.0;

/// One near-duplicate found during the corpus scan.
#[derive(Debug, Clone)]
pub struct SimilarProblem {
    pub id: i64,
    pub question: String,
    pub similarity: f64,
}

/// Outcome of the persistence gate for one record.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub final_score: f64,
    pub is_duplicate: bool,
    pub persisted: bool,
    pub stored_id: Option<i64>,
    pub similar: Vec<SimilarProblem>,
}

/// Embedded store of accepted problems. The gate method is the only write
/// path; rows are never mutated or deleted afterwards.
pub struct CorpusStore {
    connection: Connection,
}

impl CorpusStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let store = Self { connection };
        store.configure()?;
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory corpus store")?;
        let store = Self { connection };
        store.configure()?;
        store.ensure_schema()?;
        Ok(store)
    }

    fn configure(&self) -> Result<()> {
        self.connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        self.connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL")?;
        Ok(())
    }

    fn ensure_schema(&self) -> Result<()> {
        self.connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS problems (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  fingerprint TEXT NOT NULL,
                  question TEXT NOT NULL,
                  choices TEXT,
                  answer TEXT NOT NULL,
                  solution TEXT,
                  topic TEXT,
                  difficulty TEXT,
                  points INTEGER,
                  quality_score REAL NOT NULL,
                  created_at TEXT NOT NULL,
                  raw_metadata TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_problems_fingerprint ON problems(fingerprint);
                CREATE INDEX IF NOT EXISTS idx_problems_topic ON problems(topic);
                ",
            )
            .context("failed to initialize corpus schema")?;
        Ok(())
    }

    /// The persistence gate. Runs the duplicate scan, folds the uniqueness
    /// bonus into the final score, and inserts the row when the record
    /// clears both the score threshold and the duplicate check. The scan
    /// and the insert share one immediate transaction, so a second writer
    /// cannot interleave between them.
    pub fn gate(
        &mut self,
        record: &ProblemRecord,
        base_score: f64,
        uniqueness_bonus: f64,
        similarity_threshold: f64,
        persist_threshold: f64,
    ) -> Result<GateDecision> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to open gate transaction")?;

        let similar = {
            let mut statement = tx
                .prepare("SELECT id, question FROM problems")
                .context("failed to prepare duplicate scan")?;
            let rows = statement.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut similar = Vec::new();
            for row in rows {
                let (id, existing) = row?;
                let similarity = jaccard(&record.question, &existing);
                if similarity >= similarity_threshold {
                    similar.push(SimilarProblem {
                        id,
                        question: existing,
                        similarity,
                    });
                }
            }
            similar
        };

        let is_duplicate = !similar.is_empty();
        let mut final_score = base_score;
        if !is_duplicate {
            final_score += uniqueness_bonus;
        }
        let final_score = final_score.clamp(0.0, 100.0);

        let persist = final_score >= persist_threshold && !is_duplicate;
        let stored_id = if persist {
            let choices_json = serde_json::to_string(&record.choices)
                .context("failed to serialize choices")?;
            let metadata_json = serde_json::to_string(&record.warnings)
                .context("failed to serialize warnings")?;
            tx.execute(
                "
                INSERT INTO problems(
                  fingerprint, question, choices, answer, solution,
                  topic, difficulty, points, quality_score, created_at, raw_metadata
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ",
                params![
                    sha256_hex(&record.question),
                    record.question,
                    choices_json,
                    record.answer,
                    record.solution,
                    record.topic,
                    record.difficulty,
                    record.points,
                    final_score,
                    now_utc_string(),
                    metadata_json,
                ],
            )
            .context("failed to insert problem row")?;
            Some(tx.last_insert_rowid())
        } else {
            None
        };

        tx.commit().context("failed to commit gate transaction")?;

        if persist {
            info!(id = stored_id, final_score, "problem persisted");
        } else {
            debug!(
                final_score,
                is_duplicate,
                similar = similar.len(),
                "problem rejected at the gate"
            );
        }

        Ok(GateDecision {
            final_score,
            is_duplicate,
            persisted: persist,
            stored_id,
            similar,
        })
    }

    pub fn entries(&self) -> Result<Vec<CorpusEntry>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT id, question, answer, topic, difficulty, quality_score, created_at
                 FROM problems ORDER BY id",
            )
            .context("failed to prepare entry listing")?;
        let rows = statement.query_map([], |row| {
            Ok(CorpusEntry {
                id: row.get(0)?,
                question: row.get(1)?,
                answer: row.get(2)?,
                topic: row.get(3)?,
                difficulty: row.get(4)?,
                quality_score: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn stats(&self) -> Result<CorpusStats> {
        let total_problems: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM problems", [], |row| row.get(0))
            .context("failed to count problems")?;

        let average_quality: f64 = self
            .connection
            .query_row(
                "SELECT COALESCE(AVG(quality_score), 0.0) FROM problems WHERE quality_score > 0",
                [],
                |row| row.get(0),
            )
            .context("failed to average quality scores")?;

        let difficulty_distribution = self.distribution("difficulty")?;
        let topic_distribution = self.distribution("topic")?;

        Ok(CorpusStats {
            total_problems,
            difficulty_distribution,
            topic_distribution,
            average_quality,
        })
    }

    fn distribution(&self, column: &str) -> Result<Vec<(String, i64)>> {
        let sql = format!(
            "SELECT {column}, COUNT(*) FROM problems
             WHERE {column} IS NOT NULL GROUP BY {column} ORDER BY COUNT(*) DESC"
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .with_context(|| format!("failed to prepare {column} distribution"))?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut distribution = Vec::new();
        for row in rows {
            distribution.push(row?);
        }
        Ok(distribution)
    }
}

/// Character-set Jaccard similarity, case-folded. Crude but symmetric and
/// cheap enough for a full-table scan on every insert.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<char> = a.to_lowercase().chars().collect();
    let set_b: HashSet<char> = b.to_lowercase().chars().collect();

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return if a == b { 1.0 } else { 0.0 };
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f64 / union as f64
}
