// User accounts - login bookkeeping, profile and admin management

use serde::Serialize;
use serde_json::json;

use super::audit::audit_entry;
use super::Library;
use crate::auth::Identity;
use crate::db::User;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub spotify_connected: bool,
}

impl Library {
    /// Record a sign-in and make sure the user has a personal collection
    pub fn login(&self, caller: &Identity) -> AppResult<User> {
        let user = self.with_db(|db| {
            Ok(db.upsert_user_login(
                &caller.uid,
                &caller.email,
                caller.display_name.as_deref(),
                caller.photo_url.as_deref(),
                caller.email_verified,
            )?)
        })?;
        self.ensure_personal_collection(caller)?;
        log::info!("User {} signed in", caller.uid);
        Ok(user)
    }

    pub fn me(&self, caller: &Identity) -> AppResult<UserProfile> {
        self.with_db(|db| {
            let user = db
                .get_user(&caller.uid)?
                .ok_or_else(|| AppError::NotFound("User not found, please log in first".to_string()))?;
            let spotify_connected = db.get_spotify_token(&caller.uid)?.is_some();
            Ok(UserProfile {
                user,
                spotify_connected,
            })
        })
    }

    /// Change display name and/or photo; other profile fields are not user-editable
    pub fn update_me(
        &self,
        caller: &Identity,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> AppResult<UserProfile> {
        let display_name = display_name.map(str::trim);
        if display_name.is_some_and(str::is_empty) {
            return Err(AppError::BadRequest("Display name cannot be empty".to_string()));
        }
        self.me(caller)?;
        self.with_db(|db| Ok(db.update_user_profile(&caller.uid, display_name, photo_url)?))?;
        self.me(caller)
    }

    pub fn list_users(&self, caller: &Identity) -> AppResult<Vec<User>> {
        self.require_admin(caller)?;
        self.with_db(|db| Ok(db.list_users()?))
    }

    pub fn set_admin(&self, caller: &Identity, uid: &str, is_admin: bool) -> AppResult<User> {
        self.require_admin(caller)?;
        if uid == caller.uid && !is_admin {
            return Err(AppError::BadRequest(
                "You cannot remove your own admin access".to_string(),
            ));
        }
        let user = self.with_db(|db| {
            if !db.set_user_admin(uid, is_admin)? {
                return Err(AppError::NotFound("User not found".to_string()));
            }
            db.get_user(uid)?
                .ok_or_else(|| AppError::NotFound("User not found".to_string()))
        })?;

        let mut entry = audit_entry(caller, "set_admin", "user", uid);
        entry.resource_name = Some(user.email.clone());
        entry.changes = Some(json!({ "is_admin": { "new": is_admin } }));
        self.record(entry);
        Ok(user)
    }
}
