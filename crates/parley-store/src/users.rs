//! CRUD operations for [`User`] records.

use rusqlite::params;

use parley_shared::types::UserId;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{now, ts_col, ts_to_sql, uuid_col, NewUser, User};

const USER_COLUMNS: &str =
    "id, username, password_hash, display_name, about, is_restricted, created_at";

impl Database {
    /// Insert a new user. A taken username is reported as
    /// [`StoreError::Conflict`].
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let user = User {
            id: UserId::new(),
            username: new.username.clone(),
            password_hash: new.password_hash.clone(),
            display_name: new.display_name.clone(),
            about: None,
            is_restricted: false,
            created_at: now(),
        };

        let inserted = self.conn().execute(
            "INSERT INTO users (id, username, password_hash, display_name, about, is_restricted, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, 0, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.display_name,
                ts_to_sql(&user.created_at),
            ],
        );

        match inserted {
            Ok(_) => Ok(user),
            Err(e) => {
                let err = StoreError::from(e);
                if err.is_constraint_violation() {
                    Err(StoreError::Conflict(format!(
                        "username '{}' is already taken",
                        new.username
                    )))
                } else {
                    Err(err)
                }
            }
        }
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        match self.conn().query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            row_to_user,
        ) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Case-insensitive substring search over username and display name.
    pub fn search_users(&self, query: &str, limit: u32) -> Result<Vec<User>> {
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE username LIKE ?1 ESCAPE '\\' OR display_name LIKE ?1 ESCAPE '\\'
             ORDER BY username ASC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![pattern, limit], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn update_user_profile(
        &self,
        id: UserId,
        display_name: &str,
        about: Option<&str>,
    ) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET display_name = ?2, about = ?3 WHERE id = ?1",
            params![id.to_string(), display_name, about],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }

    pub fn set_user_restricted(&self, id: UserId, is_restricted: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET is_restricted = ?2 WHERE id = ?1",
            params![id.to_string(), is_restricted],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(uuid_col(row, 0)?),
        username: row.get(1)?,
        password_hash: row.get(2)?,
        display_name: row.get(3)?,
        about: row.get(4)?,
        is_restricted: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            password_hash: "hash".to_string(),
            display_name: name.to_uppercase(),
        }
    }

    #[test]
    fn usernames_are_unique() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("alice")).unwrap();

        let err = db.create_user(&new_user("alice")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn lookup_by_id_and_username() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user(&new_user("alice")).unwrap();

        assert_eq!(db.get_user(alice.id).unwrap(), alice);
        assert_eq!(db.find_user_by_username("alice").unwrap(), Some(alice));
        assert_eq!(db.find_user_by_username("bob").unwrap(), None);
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn search_matches_username_or_display_name() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("alice")).unwrap();
        db.create_user(&new_user("bob")).unwrap();
        let carol = db.create_user(&new_user("carol")).unwrap();
        db.update_user_profile(carol.id, "Alicia Keys", None).unwrap();

        let found: Vec<String> = db
            .search_users("ALI", 10)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(found, vec!["alice".to_string(), "carol".to_string()]);

        assert!(db.search_users("%", 10).unwrap().is_empty());
    }

    #[test]
    fn restricted_flag_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user(&new_user("alice")).unwrap();
        assert!(!alice.is_restricted);

        db.set_user_restricted(alice.id, true).unwrap();
        assert!(db.get_user(alice.id).unwrap().is_restricted);

        assert!(matches!(
            db.set_user_restricted(UserId::new(), true),
            Err(StoreError::NotFound)
        ));
    }
}
