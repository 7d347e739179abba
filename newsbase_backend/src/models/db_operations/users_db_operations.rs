use crate::models::User;
use bcrypt::{hash, verify, BcryptError};
use chrono::Utc;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, username, display_name, is_staff, is_superuser, is_active, last_login_time";

fn bcrypt_to_rusqlite_error(e: BcryptError) -> RusqliteError {
    RusqliteError::ToSqlConversionFailure(Box::new(e))
}

fn user_from_row(row: &Row) -> Result<User, RusqliteError> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        is_staff: row.get(3)?,
        is_superuser: row.get(4)?,
        is_active: row.get(5)?,
        last_login_time: row.get(6)?,
    })
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    display_name: &str,
    is_staff: bool,
    is_superuser: bool,
) -> Result<i32, RusqliteError> {
    let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "INSERT INTO users (username, password_hash, display_name, is_staff, is_superuser) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![username, hashed_password, display_name, is_staff, is_superuser],
    )?;
    Ok(conn.last_insert_rowid() as i32)
}

pub fn read_all_users(conn: &Connection) -> Result<Vec<User>, RusqliteError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
    let user_iter = stmt.query_map([], user_from_row)?;
    let users = user_iter.filter_map(|u| u.ok()).collect();
    Ok(users)
}

pub fn read_user_by_id(conn: &Connection, user_id: i32) -> Result<Option<User>, RusqliteError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [user_id],
        user_from_row,
    )
    .optional()
}

pub fn read_user_by_username(conn: &Connection, username: &str) -> Option<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
        [username],
        user_from_row,
    )
    .ok()
}

/// Returns the user when the password matches and the account is active.
pub fn verify_credentials(conn: &Connection, username: &str, password: &str) -> Option<User> {
    let res: rusqlite::Result<(String, bool)> = conn.query_row(
        "SELECT password_hash, is_active FROM users WHERE username = ?1",
        [username],
        |row| Ok((row.get(0)?, row.get(1)?)),
    );

    if let Ok((hash, is_active)) = res {
        if is_active && verify(password, &hash).unwrap_or(false) {
            return read_user_by_username(conn, username);
        }
    }
    None
}

pub fn update_last_login_time(conn: &Connection, username: &str) -> Result<(), RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE users SET last_login_time = ?1 WHERE username = ?2", params![now, username])?;
    Ok(())
}

pub fn change_password(conn: &Connection, username: &str, new_password: &str) -> Result<usize, RusqliteError> {
    let hashed_password = hash(new_password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE username = ?2",
        params![hashed_password, username],
    )
}

pub fn set_active(conn: &Connection, username: &str, is_active: bool) -> Result<usize, RusqliteError> {
    conn.execute("UPDATE users SET is_active = ?1 WHERE username = ?2", params![is_active, username])
}

pub fn delete_user(conn: &Connection, user_id: i32) -> Result<usize, RusqliteError> {
    conn.execute("DELETE FROM users WHERE id = ?1", [user_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::db_setup;

    fn open_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        db_setup::setup_users_db(&mut conn).unwrap();
        conn
    }

    #[test]
    fn create_and_verify() {
        let conn = open_conn();
        let id = create_user(&conn, "editor", "s3cret", "Erin Editor", true, false).unwrap();

        let user = verify_credentials(&conn, "editor", "s3cret").expect("valid credentials");
        assert_eq!(user.id, id);
        assert_eq!(user.display_name, "Erin Editor");
        assert!(user.is_staff);
        assert!(!user.is_superuser);

        assert!(verify_credentials(&conn, "editor", "wrong").is_none());
        assert!(verify_credentials(&conn, "nobody", "s3cret").is_none());
    }

    #[test]
    fn inactive_users_cannot_log_in() {
        let conn = open_conn();
        create_user(&conn, "former", "pw", "Former", true, false).unwrap();
        set_active(&conn, "former", false).unwrap();
        assert!(verify_credentials(&conn, "former", "pw").is_none());
    }

    #[test]
    fn usernames_are_unique() {
        let conn = open_conn();
        create_user(&conn, "dup", "pw", "Dup", false, false).unwrap();
        assert!(create_user(&conn, "dup", "pw", "Dup", false, false).is_err());
    }

    #[test]
    fn lookup_and_delete() {
        let conn = open_conn();
        let id = create_user(&conn, "author", "pw", "Ada Author", false, false).unwrap();
        assert_eq!(read_user_by_id(&conn, id).unwrap().unwrap().username, "author");
        assert!(read_user_by_id(&conn, id + 100).unwrap().is_none());

        update_last_login_time(&conn, "author").unwrap();
        assert!(read_user_by_username(&conn, "author").unwrap().last_login_time.is_some());

        assert_eq!(delete_user(&conn, id).unwrap(), 1);
        assert!(read_all_users(&conn).unwrap().is_empty());
    }

    #[test]
    fn password_change() {
        let conn = open_conn();
        create_user(&conn, "someone", "old", "Someone", false, false).unwrap();
        assert_eq!(change_password(&conn, "someone", "new").unwrap(), 1);
        assert!(verify_credentials(&conn, "someone", "old").is_none());
        assert!(verify_credentials(&conn, "someone", "new").is_some());
    }
}
