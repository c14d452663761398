// Collection queries

use rusqlite::{params, OptionalExtension, Result, Row};

use super::{json_column, now, to_json, Collection, Database};

const COLLECTION_COLUMNS: &str = "id, owner_uid, owner_email, name, description, is_personal,
    is_shared, collaborators, collaboration_requests, linked_playlists, created_at, updated_at";

fn collection_from_row(row: &Row) -> Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        owner_uid: row.get(1)?,
        owner_email: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        is_personal: row.get(5)?,
        is_shared: row.get(6)?,
        collaborators: json_column(row, 7)?,
        collaboration_requests: json_column(row, 8)?,
        linked_playlists: json_column(row, 9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl Database {
    /// Create a new collection
    pub fn insert_collection(&self, collection: &Collection) -> Result<()> {
        self.conn.execute(
            "INSERT INTO collections (
                id, owner_uid, owner_email, name, description, is_personal, is_shared,
                collaborators, collaboration_requests, linked_playlists, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                collection.id,
                collection.owner_uid,
                collection.owner_email,
                collection.name,
                collection.description,
                collection.is_personal,
                collection.is_shared,
                to_json(&collection.collaborators)?,
                to_json(&collection.collaboration_requests)?,
                to_json(&collection.linked_playlists)?,
                collection.created_at,
                collection.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Read a collection by id. Returns None if it doesn't exist.
    pub fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM collections WHERE id = ?", COLLECTION_COLUMNS),
                [id],
                collection_from_row,
            )
            .optional()
    }

    /// Write back every mutable field of a collection and bump updated_at
    pub fn update_collection(&self, collection: &Collection) -> Result<()> {
        self.conn.execute(
            "UPDATE collections SET
                name = ?, description = ?, is_shared = ?, collaborators = ?,
                collaboration_requests = ?, linked_playlists = ?, updated_at = ?
             WHERE id = ?",
            params![
                collection.name,
                collection.description,
                collection.is_shared,
                to_json(&collection.collaborators)?,
                to_json(&collection.collaboration_requests)?,
                to_json(&collection.linked_playlists)?,
                now(),
                collection.id,
            ],
        )?;
        Ok(())
    }

    /// Delete a collection and all of its songs. Returns the number of songs removed.
    pub fn delete_collection(&self, id: &str) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let songs = tx.execute("DELETE FROM songs WHERE collection_id = ?", [id])?;
        tx.execute("DELETE FROM collections WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(songs)
    }

    /// The auto-created personal collection of a user, if it exists yet
    pub fn get_personal_collection(&self, owner_uid: &str) -> Result<Option<Collection>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM collections WHERE owner_uid = ? AND is_personal = 1
                     ORDER BY created_at LIMIT 1",
                    COLLECTION_COLUMNS
                ),
                [owner_uid],
                collection_from_row,
            )
            .optional()
    }

    /// Collections owned by a user, personal first then by name
    pub fn get_owned_collections(&self, owner_uid: &str) -> Result<Vec<Collection>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM collections WHERE owner_uid = ?
             ORDER BY is_personal DESC, name COLLATE NOCASE",
            COLLECTION_COLUMNS
        ))?;
        let rows = stmt.query_map([owner_uid], collection_from_row)?;
        rows.collect()
    }

    /// Collections listing the given email as a collaborator
    pub fn get_collaborating_collections(&self, email: &str) -> Result<Vec<Collection>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM collections c
             WHERE EXISTS (
                SELECT 1 FROM json_each(c.collaborators) WHERE lower(json_each.value) = lower(?)
             )
             ORDER BY name COLLATE NOCASE",
            COLLECTION_COLUMNS
        ))?;
        let rows = stmt.query_map([email], collection_from_row)?;
        rows.collect()
    }

    /// All collections with sharing enabled
    pub fn get_shared_collections(&self) -> Result<Vec<Collection>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM collections WHERE is_shared = 1 ORDER BY name COLLATE NOCASE",
            COLLECTION_COLUMNS
        ))?;
        let rows = stmt.query_map([], collection_from_row)?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{CollaborationRequest, LinkedPlaylist};

    #[test]
    fn test_insert_and_get_collection() {
        let db = test_db();
        let mut collection = test_collection("c1", "u1");
        collection.linked_playlists.push(LinkedPlaylist {
            playlist_id: "pl1".into(),
            name: "Setlist".into(),
            owner: "someone".into(),
            url: "https://open.spotify.com/playlist/pl1".into(),
            image_url: None,
            track_count: 12,
            linked_at: "2025-01-01T00:00:00.000Z".into(),
            last_synced_at: None,
        });
        db.insert_collection(&collection).unwrap();

        let retrieved = db.get_collection("c1").unwrap().expect("collection should exist");
        assert_eq!(retrieved, collection);
        assert_eq!(db.get_collection("missing").unwrap(), None);
    }

    #[test]
    fn test_update_collection() {
        let db = test_db();
        let mut collection = test_collection("c1", "u1");
        db.insert_collection(&collection).unwrap();

        collection.name = "Friday gig".into();
        collection.is_shared = true;
        collection.collaborators = vec!["bass@example.com".into()];
        collection.collaboration_requests.push(CollaborationRequest {
            user_uid: "u9".into(),
            user_email: "keys@example.com".into(),
            user_name: None,
            message: "let me in".into(),
            requested_at: "2025-01-01T00:00:00.000Z".into(),
        });
        db.update_collection(&collection).unwrap();

        let stored = db.get_collection("c1").unwrap().unwrap();
        assert_eq!(stored.name, "Friday gig");
        assert!(stored.is_shared);
        assert_eq!(stored.collaborators, vec!["bass@example.com".to_string()]);
        assert_eq!(stored.collaboration_requests.len(), 1);
    }

    #[test]
    fn test_delete_collection_cascades_to_songs() {
        let db = test_db();
        db.insert_collection(&test_collection("c1", "u1")).unwrap();
        db.insert_collection(&test_collection("c2", "u1")).unwrap();
        db.insert_song(&test_song("c1", "t1")).unwrap();
        db.insert_song(&test_song("c1", "t2")).unwrap();
        db.insert_song(&test_song("c2", "t1")).unwrap();

        assert_eq!(db.delete_collection("c1").unwrap(), 2);
        assert!(db.get_collection("c1").unwrap().is_none());
        assert_eq!(db.get_songs_for_collection("c1").unwrap().len(), 0);
        assert_eq!(db.get_songs_for_collection("c2").unwrap().len(), 1);
    }

    #[test]
    fn test_personal_and_owned_collections() {
        let db = test_db();
        let mut personal = test_collection("p1", "u1");
        personal.is_personal = true;
        personal.name = "Personal Collection".into();
        let mut other = test_collection("c1", "u1");
        other.name = "Acoustic set".into();
        db.insert_collection(&other).unwrap();
        db.insert_collection(&personal).unwrap();
        db.insert_collection(&test_collection("c2", "u2")).unwrap();

        assert_eq!(db.get_personal_collection("u1").unwrap().unwrap().id, "p1");
        assert!(db.get_personal_collection("u2").unwrap().is_none());

        let owned = db.get_owned_collections("u1").unwrap();
        let ids: Vec<&str> = owned.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "c1"]);
    }

    #[test]
    fn test_collaborating_collections_case_insensitive() {
        let db = test_db();
        let mut collection = test_collection("c1", "u1");
        collection.collaborators = vec!["Guitar@Example.com".into()];
        db.insert_collection(&collection).unwrap();
        db.insert_collection(&test_collection("c2", "u1")).unwrap();

        let found = db.get_collaborating_collections("guitar@example.com").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "c1");
        assert!(db.get_collaborating_collections("nobody@example.com").unwrap().is_empty());
    }

    #[test]
    fn test_shared_collections() {
        let db = test_db();
        let mut shared = test_collection("c1", "u1");
        shared.is_shared = true;
        db.insert_collection(&shared).unwrap();
        db.insert_collection(&test_collection("c2", "u1")).unwrap();

        let found = db.get_shared_collections().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "c1");
    }
}
