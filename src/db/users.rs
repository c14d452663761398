// Users, Spotify tokens and OAuth state records

use rusqlite::{params, OptionalExtension, Result, Row};
use serde::Serialize;

use super::{now, Database};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
    pub is_admin: bool,
    pub spotify_id: Option<String>,
    pub spotify_display_name: Option<String>,
    pub spotify_email: Option<String>,
    pub spotify_product: Option<String>,
    pub spotify_country: Option<String>,
    pub created_at: String,
    pub last_login_at: Option<String>,
    pub updated_at: String,
}

/// Spotify account details cached on the user after OAuth
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpotifyProfile {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub product: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotifyToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds
    pub expires_at: i64,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthState {
    pub user_uid: String,
    pub created_at: String,
}

const USER_COLUMNS: &str = "uid, email, display_name, photo_url, email_verified, is_admin,
    spotify_id, spotify_display_name, spotify_email, spotify_product, spotify_country,
    created_at, last_login_at, updated_at";

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        uid: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        photo_url: row.get(3)?,
        email_verified: row.get(4)?,
        is_admin: row.get(5)?,
        spotify_id: row.get(6)?,
        spotify_display_name: row.get(7)?,
        spotify_email: row.get(8)?,
        spotify_product: row.get(9)?,
        spotify_country: row.get(10)?,
        created_at: row.get(11)?,
        last_login_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl Database {
    // --- Users ---

    /// Create or refresh a user on login. New users start as non-admin;
    /// existing users keep created_at and is_admin.
    pub fn upsert_user_login(
        &self,
        uid: &str,
        email: &str,
        display_name: Option<&str>,
        photo_url: Option<&str>,
        email_verified: bool,
    ) -> Result<User> {
        let ts = now();
        self.conn.execute(
            "INSERT INTO users (
                uid, email, display_name, photo_url, email_verified, is_admin,
                created_at, last_login_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6, ?6)
            ON CONFLICT(uid) DO UPDATE SET
                email = excluded.email,
                display_name = COALESCE(excluded.display_name, users.display_name),
                photo_url = COALESCE(excluded.photo_url, users.photo_url),
                email_verified = excluded.email_verified,
                last_login_at = excluded.last_login_at,
                updated_at = excluded.updated_at",
            params![uid, email, display_name, photo_url, email_verified, ts],
        )?;
        self.conn.query_row(
            &format!("SELECT {} FROM users WHERE uid = ?", USER_COLUMNS),
            [uid],
            user_from_row,
        )
    }

    pub fn get_user(&self, uid: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE uid = ?", USER_COLUMNS),
                [uid],
                user_from_row,
            )
            .optional()
    }

    /// All users, newest first
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect()
    }

    /// Update the user-editable profile fields; None leaves a field unchanged
    pub fn update_user_profile(
        &self,
        uid: &str,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET
                display_name = COALESCE(?, display_name),
                photo_url = COALESCE(?, photo_url),
                updated_at = ?
             WHERE uid = ?",
            params![display_name, photo_url, now(), uid],
        )?;
        Ok(())
    }

    /// Returns false if the user doesn't exist
    pub fn set_user_admin(&self, uid: &str, is_admin: bool) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE users SET is_admin = ?, updated_at = ? WHERE uid = ?",
            params![is_admin, now(), uid],
        )?;
        Ok(n > 0)
    }

    pub fn update_spotify_profile(&self, uid: &str, profile: &SpotifyProfile) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET
                spotify_id = ?, spotify_display_name = ?, spotify_email = ?,
                spotify_product = ?, spotify_country = ?, updated_at = ?
             WHERE uid = ?",
            params![
                profile.id,
                profile.display_name,
                profile.email,
                profile.product,
                profile.country,
                now(),
                uid
            ],
        )?;
        Ok(())
    }

    // --- Spotify tokens ---

    pub fn save_spotify_token(&self, uid: &str, token: &SpotifyToken) -> Result<()> {
        self.conn.execute(
            "INSERT INTO spotify_tokens (user_uid, access_token, refresh_token, expires_at, scope, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_uid) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at",
            params![
                uid,
                token.access_token,
                token.refresh_token,
                token.expires_at,
                token.scope,
                now()
            ],
        )?;
        Ok(())
    }

    pub fn get_spotify_token(&self, uid: &str) -> Result<Option<SpotifyToken>> {
        self.conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at, scope
                 FROM spotify_tokens WHERE user_uid = ?",
                [uid],
                |row| {
                    Ok(SpotifyToken {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        expires_at: row.get(2)?,
                        scope: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    /// Returns false if no token was stored
    pub fn delete_spotify_token(&self, uid: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM spotify_tokens WHERE user_uid = ?", [uid])?;
        Ok(n > 0)
    }

    // --- OAuth CSRF state ---

    /// Store a new state, dropping any created before `expired_before` so
    /// abandoned authorize attempts do not pile up
    pub fn save_oauth_state(&self, state: &str, uid: &str, expired_before: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM oauth_states WHERE created_at < ?",
            [expired_before],
        )?;
        tx.execute(
            "INSERT INTO oauth_states (state, user_uid, created_at) VALUES (?, ?, ?)",
            params![state, uid, now()],
        )?;
        tx.commit()
    }

    /// Look up and delete a state record. States are single use.
    pub fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthState>> {
        let tx = self.conn.unchecked_transaction()?;
        let found = tx
            .query_row(
                "SELECT user_uid, created_at FROM oauth_states WHERE state = ?",
                [state],
                |row| {
                    Ok(OAuthState {
                        user_uid: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        tx.execute("DELETE FROM oauth_states WHERE state = ?", [state])?;
        tx.commit()?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_upsert_creates_non_admin_user() {
        let db = test_db();
        let user = db
            .upsert_user_login("u1", "singer@example.com", Some("Singer"), None, true)
            .unwrap();
        assert_eq!(user.email, "singer@example.com");
        assert!(!user.is_admin);
        assert!(user.email_verified);
        assert_eq!(user.last_login_at.as_deref(), Some(user.created_at.as_str()));
    }

    #[test]
    fn test_upsert_preserves_admin_and_created_at() {
        let db = test_db();
        let first = db
            .upsert_user_login("u1", "singer@example.com", Some("Singer"), None, false)
            .unwrap();
        db.set_user_admin("u1", true).unwrap();

        let again = db
            .upsert_user_login("u1", "new@example.com", None, Some("http://img"), true)
            .unwrap();
        assert!(again.is_admin);
        assert_eq!(again.created_at, first.created_at);
        assert_eq!(again.email, "new@example.com");
        // Missing display name does not wipe the stored one
        assert_eq!(again.display_name.as_deref(), Some("Singer"));
        assert_eq!(again.photo_url.as_deref(), Some("http://img"));
    }

    #[test]
    fn test_update_profile_and_spotify_fields() {
        let db = test_db();
        db.upsert_user_login("u1", "a@example.com", Some("A"), None, true)
            .unwrap();
        db.update_user_profile("u1", Some("Alex"), None).unwrap();
        db.update_spotify_profile(
            "u1",
            &SpotifyProfile {
                id: Some("sp1".into()),
                product: Some("premium".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let user = db.get_user("u1").unwrap().unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Alex"));
        assert_eq!(user.spotify_id.as_deref(), Some("sp1"));
        assert_eq!(user.spotify_product.as_deref(), Some("premium"));
        assert!(db.get_user("ghost").unwrap().is_none());
        assert!(!db.set_user_admin("ghost", true).unwrap());
    }

    #[test]
    fn test_spotify_token_roundtrip() {
        let db = test_db();
        let token = SpotifyToken {
            access_token: "acc".into(),
            refresh_token: Some("ref".into()),
            expires_at: 1_700_000_000,
            scope: "streaming".into(),
        };
        db.save_spotify_token("u1", &token).unwrap();
        assert_eq!(db.get_spotify_token("u1").unwrap(), Some(token.clone()));

        let newer = SpotifyToken {
            access_token: "acc2".into(),
            ..token
        };
        db.save_spotify_token("u1", &newer).unwrap();
        assert_eq!(db.get_spotify_token("u1").unwrap().unwrap().access_token, "acc2");

        assert!(db.delete_spotify_token("u1").unwrap());
        assert!(db.get_spotify_token("u1").unwrap().is_none());
    }

    #[test]
    fn test_oauth_state_is_single_use() {
        let db = test_db();
        db.save_oauth_state("abc", "u1", "2000-01-01T00:00:00.000Z").unwrap();

        let first = db.take_oauth_state("abc").unwrap().expect("state should exist");
        assert_eq!(first.user_uid, "u1");
        assert!(db.take_oauth_state("abc").unwrap().is_none());
    }

    #[test]
    fn test_saving_state_drops_expired_ones() {
        let db = test_db();
        db.conn
            .execute(
                "INSERT INTO oauth_states (state, user_uid, created_at) VALUES ('old', 'u1', '2024-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        db.save_oauth_state("recent", "u2", "2023-12-31T23:50:00.000Z").unwrap();
        assert!(db.take_oauth_state("old").unwrap().is_some());

        db.conn
            .execute(
                "INSERT INTO oauth_states (state, user_uid, created_at) VALUES ('old', 'u1', '2024-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        db.save_oauth_state("fresh", "u3", "2024-01-01T00:10:00.000Z").unwrap();
        assert!(db.take_oauth_state("old").unwrap().is_none());
        assert!(db.take_oauth_state("recent").unwrap().is_some());
        assert!(db.take_oauth_state("fresh").unwrap().is_some());
    }
}
