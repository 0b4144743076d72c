use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, Row};
use tracing::info;

use crate::error::{MatchError, Result};

use super::Backend;

const CREATE_TABLE_SUBJECTS: &str = "CREATE TABLE IF NOT EXISTS subjects (
    id integer primary key,
    name text not null unique
)";

const CREATE_TABLE_AVAILABILITY: &str = "CREATE TABLE IF NOT EXISTS availability (
    id integer primary key,
    subject text,
    slot text,
    unique(subject, slot)
)";

const CREATE_TABLE_EXCLUSIONS: &str = "CREATE TABLE IF NOT EXISTS exclusions (
    id integer primary key,
    subject1 text,
    subject2 text
)";

/// SQLite record store holding subjects, their availability and forbidden
/// pairs.
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref();
        let db = Database::wrap(Connection::open(path)?)?;
        info!(event = "database_open", path = %path.display());
        Ok(db)
    }

    pub fn in_memory() -> Result<Database> {
        Database::wrap(Connection::open_in_memory()?)
    }

    fn wrap(conn: Connection) -> Result<Database> {
        let db = Database {
            connection: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        for creation in [
            CREATE_TABLE_SUBJECTS,
            CREATE_TABLE_AVAILABILITY,
            CREATE_TABLE_EXCLUSIONS,
        ] {
            conn.execute(creation, [])?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| MatchError::Backend("database connection lock poisoned".to_owned()))
    }

    pub fn add_subject(&self, name: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR IGNORE INTO subjects (name) VALUES (?1)",
            [name],
        )?;
        Ok(())
    }

    /// Records that `subject` is free at `slot`, registering the subject if
    /// needed. Repeating a row is a no-op.
    pub fn add_availability(&self, subject: &str, slot: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO subjects (name) VALUES (?1)",
            [subject],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO availability (subject, slot) VALUES (?1, ?2)",
            params![subject, slot],
        )?;
        Ok(())
    }

    pub fn add_exclusion(&self, subject1: &str, subject2: &str) -> Result<()> {
        if subject1 == subject2 {
            return Err(MatchError::Validation(format!(
                "cannot exclude {subject1:?} from pairing with itself"
            )));
        }
        self.lock()?.execute(
            "INSERT INTO exclusions (subject1, subject2) VALUES (?1, ?2)",
            params![subject1, subject2],
        )?;
        Ok(())
    }

    fn pairs(&self, sql: &str, table: &str, columns: [&str; 2]) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let a = required(row, 1, id, table, columns[0])?;
            let b = required(row, 2, id, table, columns[1])?;
            out.push((a, b));
        }
        Ok(out)
    }
}

fn required(row: &Row<'_>, idx: usize, id: i64, table: &str, column: &str) -> Result<String> {
    let value: Option<String> = row.get(idx)?;
    value.ok_or_else(|| {
        MatchError::Validation(format!("{table} row {id} has no {column}"))
    })
}

impl Backend for Database {
    type Subject = String;
    type Slot = String;

    fn get_subjects(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM subjects ORDER BY name")?;
        let mut rows = stmt.query([])?;

        let mut subjects = Vec::new();
        while let Some(row) = rows.next()? {
            subjects.push(row.get(0)?);
        }
        Ok(subjects)
    }

    fn get_availability(&self) -> Result<Vec<(String, String)>> {
        self.pairs(
            "SELECT id, subject, slot FROM availability ORDER BY id",
            "availability",
            ["subject", "slot"],
        )
    }

    fn get_exclusions(&self) -> Result<Vec<(String, String)>> {
        self.pairs(
            "SELECT id, subject1, subject2 FROM exclusions ORDER BY id",
            "exclusions",
            ["subject1", "subject2"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_reads_rows() {
        let db = Database::in_memory().unwrap();
        db.add_subject("zoe").unwrap();
        db.add_availability("ann", "mon").unwrap();
        db.add_availability("ann", "mon").unwrap();
        db.add_availability("bob", "mon").unwrap();
        db.add_exclusion("ann", "zoe").unwrap();

        assert_eq!(db.get_subjects().unwrap(), vec!["ann", "bob", "zoe"]);
        assert_eq!(db.get_availability().unwrap().len(), 2);
        assert_eq!(
            db.get_exclusions().unwrap(),
            vec![("ann".to_owned(), "zoe".to_owned())]
        );
        assert!(db.add_exclusion("bob", "bob").is_err());
    }

    #[test]
    fn null_cells_are_validation_errors() {
        let db = Database::in_memory().unwrap();
        db.lock()
            .unwrap()
            .execute("INSERT INTO availability (id, subject, slot) VALUES (7, 'ann', NULL)", [])
            .unwrap();

        let err = db.get_availability().unwrap_err();
        assert!(matches!(err, MatchError::Validation(ref msg) if msg.contains("row 7")));
    }
}
