use crate::models::db_operations::news_db_operations::{CATEGORIES, ENTRIES, ENTRY_SLUGS, TAGS};
use redb::{CommitError, Database, StorageError, TableError, TransactionError};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
}

pub fn setup_users_db(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;
    log::info!("Creating 'users' table");
    tx.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            is_staff INTEGER NOT NULL DEFAULT 0,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_login_time TEXT
        )",
        [],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn setup_news_db(db: &Database) -> Result<(), SetupError> {
    let write_txn = db.begin_write()?;
    {
        log::info!("Creating 'entries' table in Redb");
        write_txn.open_table(ENTRIES)?;

        log::info!("Creating 'entry_slugs' table in Redb");
        write_txn.open_table(ENTRY_SLUGS)?;

        log::info!("Creating 'categories' table in Redb");
        write_txn.open_table(CATEGORIES)?;

        log::info!("Creating 'tags' table in Redb");
        write_txn.open_table(TAGS)?;
    }
    write_txn.commit()?;
    Ok(())
}
