// Collections - personal and named song collections, sharing and collaborators

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

use super::audit::audit_entry;
use super::{AccessLevel, Library};
use crate::auth::Identity;
use crate::db::{now, CollaborationRequest, Collection, Database, LinkedPlaylist};
use crate::error::{AppError, AppResult};

pub const PERSONAL_COLLECTION_NAME: &str = "Personal Collection";
const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 1000;
const MAX_COLLABORATORS: usize = 10;
const MAX_REQUEST_MESSAGE_LEN: usize = 500;
/// Song count queries in flight at once when listing collections
const COUNT_CONCURRENCY: usize = 10;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// A collection as the caller sees it, with song counts
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    #[serde(flatten)]
    pub collection: Collection,
    pub access_level: AccessLevel,
    pub song_count: i64,
    pub orphaned_count: i64,
    pub playlist_count: usize,
}

/// A shared collection the caller could ask to join
#[derive(Debug, Clone, Serialize)]
pub struct SharedCollection {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner_email: String,
    pub song_count: i64,
    pub playlist_count: usize,
    pub access_requested: bool,
    pub created_at: String,
}

/// Fields an owner may change. Anything else in the request body is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_shared: Option<bool>,
    pub collaborators: Option<Vec<String>>,
}

impl CollectionUpdate {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.is_shared.is_none()
            && self.collaborators.is_none()
    }
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Collection name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "Collection name must be {} characters or less",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_description(description: &str) -> AppResult<String> {
    let description = description.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::BadRequest(format!(
            "Description must be {} characters or less",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(description.to_string())
}

/// Lower-case, deduplicate and check a collaborator list
pub(crate) fn normalize_collaborators(emails: &[String], owner_email: &str) -> AppResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for raw in emails {
        let email = raw.trim().to_lowercase();
        if email.is_empty() {
            continue;
        }
        if !EMAIL.is_match(&email) {
            return Err(AppError::BadRequest(format!("Invalid email address: {}", raw.trim())));
        }
        if email.eq_ignore_ascii_case(owner_email) {
            return Err(AppError::BadRequest(
                "You cannot add yourself as a collaborator".to_string(),
            ));
        }
        if !out.contains(&email) {
            out.push(email);
        }
    }
    if out.len() > MAX_COLLABORATORS {
        return Err(AppError::BadRequest(format!(
            "A collection can have at most {} collaborators",
            MAX_COLLABORATORS
        )));
    }
    Ok(out)
}

fn new_collection(caller: &Identity, name: String, description: String, is_personal: bool, is_shared: bool) -> Collection {
    let ts = now();
    Collection {
        id: uuid::Uuid::new_v4().to_string(),
        owner_uid: caller.uid.clone(),
        owner_email: caller.email.to_lowercase(),
        name,
        description,
        is_personal,
        is_shared,
        collaborators: Vec::new(),
        collaboration_requests: Vec::new(),
        linked_playlists: Vec::new(),
        created_at: ts.clone(),
        updated_at: ts,
    }
}

/// Song counts for one collection on the blocking pool
async fn count_in_background(db: Arc<Mutex<Database>>, collection_id: String) -> AppResult<(String, (i64, i64))> {
    tokio::task::spawn_blocking(move || -> AppResult<(String, (i64, i64))> {
        let db = db
            .lock()
            .map_err(|_| AppError::Internal("database lock poisoned".to_string()))?;
        let counts = db.count_songs(&collection_id)?;
        Ok((collection_id, counts))
    })
    .await
    .map_err(|e| AppError::Internal(format!("count task failed: {}", e)))?
}

fn summarize(mut collection: Collection, level: AccessLevel, counts: (i64, i64)) -> CollectionSummary {
    if !level.is_owner() {
        collection.collaboration_requests.clear();
    }
    let playlist_count = collection.linked_playlists.len();
    CollectionSummary {
        collection,
        access_level: level,
        song_count: counts.0,
        orphaned_count: counts.1,
        playlist_count,
    }
}

/// Apply an owner's edit in place. Returns the audit diff of what changed.
fn apply_update(collection: &mut Collection, update: &CollectionUpdate) -> AppResult<Map<String, Value>> {
    let mut changes = Map::new();

    if let Some(name) = &update.name {
        let name = validate_name(name)?;
        if name != collection.name {
            if collection.is_personal {
                return Err(AppError::BadRequest(
                    "The personal collection cannot be renamed".to_string(),
                ));
            }
            changes.insert("name".into(), json!({ "old": collection.name, "new": name }));
            collection.name = name;
        }
    }

    if let Some(description) = &update.description {
        let description = validate_description(description)?;
        if description != collection.description {
            changes.insert(
                "description".into(),
                json!({ "old": collection.description, "new": description }),
            );
            collection.description = description;
        }
    }

    if let Some(is_shared) = update.is_shared {
        if is_shared && collection.is_personal {
            return Err(AppError::BadRequest(
                "The personal collection cannot be shared".to_string(),
            ));
        }
        if is_shared != collection.is_shared {
            changes.insert(
                "is_shared".into(),
                json!({ "old": collection.is_shared, "new": is_shared }),
            );
            collection.is_shared = is_shared;
        }
    }

    if let Some(emails) = &update.collaborators {
        let collaborators = normalize_collaborators(emails, &collection.owner_email)?;
        if collection.is_personal && !collaborators.is_empty() {
            return Err(AppError::BadRequest(
                "The personal collection cannot have collaborators".to_string(),
            ));
        }
        if collaborators != collection.collaborators {
            changes.insert(
                "collaborators".into(),
                json!({ "old": collection.collaborators, "new": collaborators }),
            );
            collection.collaborators = collaborators;
        }
    }
    Ok(changes)
}

impl Library {
    /// The caller's personal collection, created on first use
    pub fn ensure_personal_collection(&self, caller: &Identity) -> AppResult<Collection> {
        self.with_db(|db| {
            if let Some(existing) = db.get_personal_collection(&caller.uid)? {
                return Ok(existing);
            }
            let collection = new_collection(
                caller,
                PERSONAL_COLLECTION_NAME.to_string(),
                "Your personal song collection".to_string(),
                true,
                false,
            );
            db.insert_collection(&collection)?;
            log::info!("Created personal collection {} for {}", collection.id, caller.uid);
            Ok(collection)
        })
    }

    /// Owned and collaborating collections, personal first
    pub async fn list_collections(&self, caller: &Identity) -> AppResult<Vec<CollectionSummary>> {
        let mut collections = self.with_db(|db| {
            let mut all = db.get_owned_collections(&caller.uid)?;
            for c in db.get_collaborating_collections(&caller.email)? {
                if !all.iter().any(|o| o.id == c.id) {
                    all.push(c);
                }
            }
            Ok(all)
        })?;

        let ids: Vec<String> = collections.iter().map(|c| c.id.clone()).collect();
        let counts: Vec<AppResult<(String, (i64, i64))>> = stream::iter(ids)
            .map(|id| count_in_background(Arc::clone(&self.db), id))
            .buffer_unordered(COUNT_CONCURRENCY)
            .collect()
            .await;
        let mut by_id = std::collections::HashMap::new();
        for result in counts {
            let (id, c) = result?;
            by_id.insert(id, c);
        }

        collections.sort_by_cached_key(|c| {
            let own_personal = c.is_personal && c.owner_uid == caller.uid;
            (!own_personal, c.name.to_lowercase())
        });
        Ok(collections
            .into_iter()
            .map(|c| {
                let level = AccessLevel::for_caller(&c, caller);
                let counts = by_id.get(&c.id).copied().unwrap_or((0, 0));
                summarize(c, level, counts)
            })
            .collect())
    }

    pub fn create_collection(
        &self,
        caller: &Identity,
        name: &str,
        description: Option<&str>,
        is_shared: bool,
    ) -> AppResult<Collection> {
        let name = validate_name(name)?;
        let description = validate_description(description.unwrap_or(""))?;
        let collection = new_collection(caller, name, description, false, is_shared);
        self.with_db(|db| Ok(db.insert_collection(&collection)?))?;

        let mut entry = audit_entry(caller, "create_collection", "collection", &collection.id);
        entry.resource_name = Some(collection.name.clone());
        entry.collection_id = Some(collection.id.clone());
        entry.metadata = Some(json!({ "is_shared": is_shared }));
        self.record(entry);
        Ok(collection)
    }

    pub fn get_collection(&self, caller: &Identity, collection_id: &str) -> AppResult<CollectionSummary> {
        let (collection, level) = self.collection_for(caller, collection_id, AccessLevel::Viewer)?;
        let counts = self.with_db(|db| Ok(db.count_songs(collection_id)?))?;
        Ok(summarize(collection, level, counts))
    }

    pub fn update_collection(
        &self,
        caller: &Identity,
        collection_id: &str,
        update: CollectionUpdate,
    ) -> AppResult<Collection> {
        if update.is_empty() {
            return Err(AppError::BadRequest("No valid fields to update".to_string()));
        }
        let (collection, changes) = self.modify_collection(
            caller,
            collection_id,
            AccessLevel::Owner,
            |collection, _| apply_update(collection, &update),
        )?;

        if !changes.is_empty() {
            let mut entry = audit_entry(caller, "update_collection", "collection", collection_id);
            entry.resource_name = Some(collection.name.clone());
            entry.collection_id = Some(collection_id.to_string());
            entry.changes = Some(Value::Object(changes));
            self.record(entry);
        }
        Ok(collection)
    }

    /// Delete a collection and all of its songs. Returns the number of songs deleted.
    pub fn delete_collection(&self, caller: &Identity, collection_id: &str) -> AppResult<usize> {
        let (collection, _) = self.collection_for(caller, collection_id, AccessLevel::Owner)?;
        if collection.is_personal {
            return Err(AppError::BadRequest(
                "The personal collection cannot be deleted".to_string(),
            ));
        }
        let deleted = self.with_db(|db| Ok(db.delete_collection(collection_id)?))?;

        let mut entry = audit_entry(caller, "delete_collection", "collection", collection_id);
        entry.resource_name = Some(collection.name);
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({ "songs_deleted": deleted }));
        self.record(entry);
        Ok(deleted)
    }

    /// Shared collections the caller has no part in yet
    pub fn list_shared_collections(&self, caller: &Identity) -> AppResult<Vec<SharedCollection>> {
        self.with_db(|db| {
            let mut out = Vec::new();
            for c in db.get_shared_collections()? {
                if c.owner_uid == caller.uid || c.is_collaborator(&caller.email) {
                    continue;
                }
                let (song_count, _) = db.count_songs(&c.id)?;
                out.push(SharedCollection {
                    access_requested: c
                        .collaboration_requests
                        .iter()
                        .any(|r| r.user_uid == caller.uid),
                    playlist_count: c.linked_playlists.len(),
                    id: c.id,
                    name: c.name,
                    description: c.description,
                    owner_email: c.owner_email,
                    song_count,
                    created_at: c.created_at,
                });
            }
            Ok(out)
        })
    }

    pub fn linked_playlists(&self, caller: &Identity, collection_id: &str) -> AppResult<Vec<LinkedPlaylist>> {
        let (collection, _) = self.collection_for(caller, collection_id, AccessLevel::Viewer)?;
        Ok(collection.linked_playlists)
    }

    /// Ask the owner of a shared collection for collaborator access
    pub fn request_collaboration(
        &self,
        caller: &Identity,
        collection_id: &str,
        message: Option<&str>,
    ) -> AppResult<()> {
        let message: String = message
            .unwrap_or("")
            .trim()
            .chars()
            .take(MAX_REQUEST_MESSAGE_LEN)
            .collect();

        let (collection, _) = self.modify_collection(
            caller,
            collection_id,
            AccessLevel::Viewer,
            |collection, level| {
                if level >= AccessLevel::Collaborator {
                    return Err(AppError::BadRequest(
                        "You already have access to this collection".to_string(),
                    ));
                }
                if collection
                    .collaboration_requests
                    .iter()
                    .any(|r| r.user_uid == caller.uid)
                {
                    return Err(AppError::Conflict(
                        "You have already requested access to this collection".to_string(),
                    ));
                }
                collection.collaboration_requests.push(CollaborationRequest {
                    user_uid: caller.uid.clone(),
                    user_email: caller.email.to_lowercase(),
                    user_name: caller.display_name.clone(),
                    message: message.clone(),
                    requested_at: now(),
                });
                Ok(())
            },
        )?;

        let mut entry = audit_entry(caller, "request_collaboration", "collection", collection_id);
        entry.resource_name = Some(collection.name);
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({ "message": message }));
        self.record(entry);
        Ok(())
    }

    pub fn accept_request(
        &self,
        caller: &Identity,
        collection_id: &str,
        requester_uid: &str,
    ) -> AppResult<Collection> {
        let (collection, email) = self.modify_collection(
            caller,
            collection_id,
            AccessLevel::Owner,
            |collection, _| {
                let request = take_request(collection, requester_uid)?;
                let email = request.user_email.to_lowercase();
                if !collection.is_collaborator(&email) {
                    if collection.collaborators.len() >= MAX_COLLABORATORS {
                        return Err(AppError::BadRequest(format!(
                            "A collection can have at most {} collaborators",
                            MAX_COLLABORATORS
                        )));
                    }
                    collection.collaborators.push(email.clone());
                }
                Ok(email)
            },
        )?;

        let mut entry = audit_entry(caller, "accept_collaboration", "collection", collection_id);
        entry.resource_name = Some(collection.name.clone());
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({ "requester_uid": requester_uid, "requester_email": email }));
        self.record(entry);
        Ok(collection)
    }

    pub fn deny_request(
        &self,
        caller: &Identity,
        collection_id: &str,
        requester_uid: &str,
    ) -> AppResult<Collection> {
        let (collection, request) = self.modify_collection(
            caller,
            collection_id,
            AccessLevel::Owner,
            |collection, _| take_request(collection, requester_uid),
        )?;

        let mut entry = audit_entry(caller, "deny_collaboration", "collection", collection_id);
        entry.resource_name = Some(collection.name.clone());
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({
            "requester_uid": requester_uid,
            "requester_email": request.user_email,
        }));
        self.record(entry);
        Ok(collection)
    }
}

fn take_request(collection: &mut Collection, requester_uid: &str) -> AppResult<CollaborationRequest> {
    let idx = collection
        .collaboration_requests
        .iter()
        .position(|r| r.user_uid == requester_uid)
        .ok_or_else(|| AppError::NotFound("Collaboration request not found".to_string()))?;
    Ok(collection.collaboration_requests.remove(idx))
}
