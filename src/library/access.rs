// Collection access levels and the lookups that enforce them

use serde::Serialize;

use super::Library;
use crate::auth::Identity;
use crate::db::{Collection, Song, User};
use crate::error::{AppError, AppResult};

/// What a caller may do with a collection. Ordered from least to most access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    Viewer,
    Collaborator,
    Owner,
}

impl AccessLevel {
    pub fn for_caller(collection: &Collection, caller: &Identity) -> Self {
        if collection.owner_uid == caller.uid {
            AccessLevel::Owner
        } else if collection.is_collaborator(&caller.email) {
            AccessLevel::Collaborator
        } else if collection.is_shared {
            AccessLevel::Viewer
        } else {
            AccessLevel::None
        }
    }

    pub fn can_read(self) -> bool {
        self >= AccessLevel::Viewer
    }

    pub fn can_edit(self) -> bool {
        self >= AccessLevel::Collaborator
    }

    pub fn is_owner(self) -> bool {
        self == AccessLevel::Owner
    }

    fn denied_message(required: AccessLevel) -> &'static str {
        match required {
            AccessLevel::Owner => "Only the collection owner can do this",
            AccessLevel::Collaborator => "You don't have permission to edit this collection",
            AccessLevel::Viewer | AccessLevel::None => "You don't have access to this collection",
        }
    }
}

impl Library {
    /// Load a collection and check the caller has at least `required` access
    pub(crate) fn collection_for(
        &self,
        caller: &Identity,
        collection_id: &str,
        required: AccessLevel,
    ) -> AppResult<(Collection, AccessLevel)> {
        let collection = self
            .with_db(|db| Ok(db.get_collection(collection_id)?))?
            .ok_or_else(|| AppError::NotFound("Collection not found".to_string()))?;
        let level = check_access(&collection, caller, required)?;
        Ok((collection, level))
    }

    /// Load a song with its collection and check the caller's access to it
    pub(crate) fn song_for(
        &self,
        caller: &Identity,
        song_id: &str,
        required: AccessLevel,
    ) -> AppResult<(Song, Collection, AccessLevel)> {
        let (song, collection) = self.with_db(|db| {
            let Some(song) = db.get_song(song_id)? else {
                return Ok(None);
            };
            let collection = db.get_collection(&song.collection_id)?;
            Ok(collection.map(|c| (song, c)))
        })?
        .ok_or_else(|| AppError::NotFound("Song not found".to_string()))?;
        let level = check_access(&collection, caller, required)?;
        Ok((song, collection, level))
    }

    /// Load a collection, check access, change it and write it back, all under
    /// one database lock. Nothing is written when `apply` leaves it unchanged.
    pub(crate) fn modify_collection<T>(
        &self,
        caller: &Identity,
        collection_id: &str,
        required: AccessLevel,
        apply: impl FnOnce(&mut Collection, AccessLevel) -> AppResult<T>,
    ) -> AppResult<(Collection, T)> {
        self.with_db(|db| {
            let mut collection = db
                .get_collection(collection_id)?
                .ok_or_else(|| AppError::NotFound("Collection not found".to_string()))?;
            let level = check_access(&collection, caller, required)?;
            let before = collection.clone();
            let out = apply(&mut collection, level)?;
            if collection != before {
                db.update_collection(&collection)?;
            }
            Ok((collection, out))
        })
    }

    /// The caller's stored user record, which must carry the admin flag
    pub(crate) fn require_admin(&self, caller: &Identity) -> AppResult<User> {
        self.with_db(|db| Ok(db.get_user(&caller.uid)?))?
            .filter(|u| u.is_admin)
            .ok_or_else(|| AppError::Forbidden("Admin access required".to_string()))
    }
}

pub(crate) fn check_access(
    collection: &Collection,
    caller: &Identity,
    required: AccessLevel,
) -> AppResult<AccessLevel> {
    let level = AccessLevel::for_caller(collection, caller);
    if level >= required && level != AccessLevel::None {
        Ok(level)
    } else {
        Err(AppError::Forbidden(
            AccessLevel::denied_message(required).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::db::test_support::test_collection;

    #[test]
    fn test_levels() {
        let mut c = test_collection("c1", "owner");
        c.collaborators = vec!["Band@Example.com".to_string()];

        assert_eq!(AccessLevel::for_caller(&c, &identity("owner")), AccessLevel::Owner);
        assert_eq!(AccessLevel::for_caller(&c, &identity("band")), AccessLevel::Collaborator);
        assert_eq!(AccessLevel::for_caller(&c, &identity("stranger")), AccessLevel::None);

        c.is_shared = true;
        assert_eq!(AccessLevel::for_caller(&c, &identity("stranger")), AccessLevel::Viewer);
    }

    #[test]
    fn test_check_access() {
        let mut c = test_collection("c1", "owner");
        c.is_shared = true;
        c.collaborators = vec!["band@example.com".to_string()];

        assert!(check_access(&c, &identity("stranger"), AccessLevel::Viewer).is_ok());
        assert!(matches!(
            check_access(&c, &identity("stranger"), AccessLevel::Collaborator),
            Err(AppError::Forbidden(_))
        ));
        assert!(check_access(&c, &identity("band"), AccessLevel::Collaborator).is_ok());
        assert!(matches!(
            check_access(&c, &identity("band"), AccessLevel::Owner),
            Err(AppError::Forbidden(_))
        ));

        c.is_shared = false;
        assert!(matches!(
            check_access(&c, &identity("stranger"), AccessLevel::None),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_missing_collection_is_not_found() {
        let h = harness();
        let result = h
            .library
            .collection_for(&identity("owner"), "nope", AccessLevel::Viewer);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
