use std::collections::HashSet;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;

use crate::config::Credentials;
use crate::domain::{AlignmentRecord, Fragment, Protein, TaxId, Taxon};
use crate::error::AnnotateError;

pub const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of an insert under the insert-or-skip conflict policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same unique key already existed and was left untouched.
    Skipped,
}

impl InsertOutcome {
    fn from_changes(changes: usize) -> Self {
        if changes == 0 {
            InsertOutcome::Skipped
        } else {
            InsertOutcome::Inserted
        }
    }
}

/// Persistence for fragments, taxa, proteins and alignment rows.
///
/// Fragment, taxon and protein inserts never overwrite: a duplicate key is
/// reported as [`InsertOutcome::Skipped`]. Alignment rows are append-only.
pub trait RecordStore {
    fn fragment_headers(&self) -> Result<HashSet<String>, AnnotateError>;

    fn taxon_ids(&self) -> Result<HashSet<TaxId>, AnnotateError>;

    fn insert_fragment(&self, fragment: &Fragment) -> Result<InsertOutcome, AnnotateError>;

    /// Inserts `taxa` in slice order within one transaction; parents must
    /// precede their children. Returns the number of rows actually written.
    fn insert_taxa(&mut self, taxa: &[Taxon]) -> Result<usize, AnnotateError>;

    fn insert_protein(&self, protein: &Protein) -> Result<InsertOutcome, AnnotateError>;

    /// The fragment is resolved by header, so it must already be stored.
    fn insert_alignment(
        &self,
        header: &str,
        record: &AlignmentRecord,
    ) -> Result<(), AnnotateError>;
}

/// Opens one store connection per caller; connections are never shared.
pub trait StoreConnector: Send + Sync {
    type Store: RecordStore;

    fn connect(&self) -> Result<Self::Store, AnnotateError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub fragments: u64,
    pub taxa: u64,
    pub proteins: u64,
    pub alignments: u64,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Utf8Path) -> Result<Self, AnnotateError> {
        let conn = Connection::open(path.as_std_path())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AnnotateError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AnnotateError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, AnnotateError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), AnnotateError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(AnnotateError::StoreUnavailable(format!(
                "unsupported schema version {current}, max supported {SCHEMA_VERSION}"
            )));
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn taxon(&self, tax_id: TaxId) -> Result<Option<Taxon>, AnnotateError> {
        Ok(self
            .conn
            .query_row(
                "SELECT tax_id, name, parent_tax_id FROM taxonomy WHERE tax_id = ?1",
                params![tax_id.get()],
                |row| {
                    Ok(Taxon {
                        tax_id: TaxId::new(row.get(0)?),
                        name: row.get(1)?,
                        parent_tax_id: row.get::<_, Option<i64>>(2)?.map(TaxId::new),
                    })
                },
            )
            .optional()?)
    }

    pub fn protein(&self, accession: &str) -> Result<Option<Protein>, AnnotateError> {
        Ok(self
            .conn
            .query_row(
                "SELECT accession_number, tax_id, sequence, name FROM protein
                 WHERE accession_number = ?1",
                params![accession],
                |row| {
                    Ok(Protein {
                        accession: row.get(0)?,
                        tax_id: row.get::<_, Option<i64>>(1)?.map(TaxId::new),
                        sequence: row.get(2)?,
                        name: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn alignment_count_for(&self, header: &str) -> Result<u64, AnnotateError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM blast_result r
             JOIN fragment f ON f.fragment_id = r.fragment_id
             WHERE f.header = ?1",
            params![header],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// `(fragment_id, quality)` for every stored fragment.
    pub fn fragment_qualities(&self) -> Result<Vec<(i64, String)>, AnnotateError> {
        let mut stmt = self
            .conn
            .prepare("SELECT fragment_id, quality FROM fragment ORDER BY fragment_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn fragment_score(&self, header: &str) -> Result<Option<f64>, AnnotateError> {
        Ok(self
            .conn
            .query_row(
                "SELECT quality_fragment FROM fragment WHERE header = ?1",
                params![header],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()?
            .flatten())
    }

    pub fn set_fragment_scores(&mut self, scores: &[(i64, f64)]) -> Result<usize, AnnotateError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE fragment SET quality_fragment = ?1 WHERE fragment_id = ?2",
            )?;
            for (fragment_id, score) in scores {
                updated += stmt.execute(params![score, fragment_id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    pub fn stats(&self) -> Result<StoreStats, AnnotateError> {
        let count = |table: &str| -> Result<u64, AnnotateError> {
            let count: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(count as u64)
        };
        Ok(StoreStats {
            fragments: count("fragment")?,
            taxa: count("taxonomy")?,
            proteins: count("protein")?,
            alignments: count("blast_result")?,
        })
    }
}

impl RecordStore for SqliteStore {
    fn fragment_headers(&self) -> Result<HashSet<String>, AnnotateError> {
        let mut stmt = self.conn.prepare("SELECT header FROM fragment")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    fn taxon_ids(&self) -> Result<HashSet<TaxId>, AnnotateError> {
        let mut stmt = self.conn.prepare("SELECT tax_id FROM taxonomy")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0).map(TaxId::new))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    fn insert_fragment(&self, fragment: &Fragment) -> Result<InsertOutcome, AnnotateError> {
        let changes = self.conn.execute(
            "INSERT INTO fragment (header, seq, quality) VALUES (?1, ?2, ?3)
             ON CONFLICT(header) DO NOTHING",
            params![fragment.header, fragment.sequence, fragment.quality],
        )?;
        Ok(InsertOutcome::from_changes(changes))
    }

    fn insert_taxa(&mut self, taxa: &[Taxon]) -> Result<usize, AnnotateError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO taxonomy (tax_id, name, parent_tax_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tax_id) DO NOTHING",
            )?;
            for taxon in taxa {
                inserted += stmt.execute(params![
                    taxon.tax_id.get(),
                    taxon.name,
                    taxon.parent_tax_id.map(TaxId::get),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_protein(&self, protein: &Protein) -> Result<InsertOutcome, AnnotateError> {
        let changes = self.conn.execute(
            "INSERT INTO protein (accession_number, tax_id, sequence, name) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(accession_number) DO NOTHING",
            params![
                protein.accession,
                protein.tax_id.map(TaxId::get),
                protein.sequence,
                protein.name,
            ],
        )?;
        Ok(InsertOutcome::from_changes(changes))
    }

    fn insert_alignment(
        &self,
        header: &str,
        record: &AlignmentRecord,
    ) -> Result<(), AnnotateError> {
        self.conn.execute(
            "INSERT INTO blast_result (
                fragment_id, accession_number, score, expect, identities, positives, gaps
            ) VALUES (
                (SELECT fragment_id FROM fragment WHERE header = ?1), ?2, ?3, ?4, ?5, ?6, ?7
            )",
            params![
                header,
                record.accession,
                record.score,
                record.expect,
                record.identities,
                record.positives,
                record.gaps,
            ],
        )?;
        Ok(())
    }
}

/// Connects workers to one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: Utf8PathBuf,
    credentials: Option<Credentials>,
}

impl SqliteConnector {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            credentials: None,
        }
    }

    /// SQLite performs no authentication; the login only identifies the operator.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    fn connect(&self) -> Result<SqliteStore, AnnotateError> {
        let store = SqliteStore::open(&self.path)?;
        tracing::trace!(
            database = %self.path,
            user = self.credentials.as_ref().map(|creds| creds.user.as_str()),
            "opened store connection"
        );
        Ok(store)
    }
}
