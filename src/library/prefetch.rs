// Background lyrics/BPM backfill after an import or sync

use serde::Serialize;

use super::Library;
use crate::db::Bpm;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchStats {
    pub lyrics_fetched: usize,
    pub bpm_fetched: usize,
    pub failed: usize,
}

impl Library {
    /// Fire-and-forget backfill of a collection; never blocks the caller
    pub(crate) fn schedule_prefetch(&self, collection_id: &str) {
        if !self.prefetch.enabled {
            return;
        }
        let library = self.clone();
        let collection_id = collection_id.to_string();
        tokio::spawn(async move {
            let stats = library.prefetch_collection(&collection_id).await;
            log::info!(
                "Prefetch for collection {} done: {} lyrics, {} BPM, {} failed",
                collection_id,
                stats.lyrics_fetched,
                stats.bpm_fetched,
                stats.failed
            );
        });
    }

    /// Fetch missing lyrics, then missing BPM, one song at a time, up to
    /// `max_songs` of each
    pub(crate) async fn prefetch_collection(&self, collection_id: &str) -> PrefetchStats {
        let mut stats = PrefetchStats::default();
        let songs = match self.with_db(|db| Ok(db.get_songs_for_collection(collection_id)?)) {
            Ok(songs) => songs,
            Err(e) => {
                log::error!("Prefetch could not load collection {}: {}", collection_id, e);
                return stats;
            }
        };
        let max = self.prefetch.max_songs;

        let needs_lyrics = songs
            .iter()
            .filter(|s| !s.lyrics_fetched && !s.is_customized && !s.is_orphaned)
            .take(max);
        for song in needs_lyrics {
            match self.fetch_and_store_lyrics(song, false, false).await {
                Ok(_) => stats.lyrics_fetched += 1,
                Err(e) => {
                    log::warn!("Prefetch lyrics failed for song {}: {}", song.id, e);
                    stats.failed += 1;
                }
            }
        }

        let needs_bpm = songs
            .iter()
            .filter(|s| s.bpm == Bpm::NotAvailable && !s.bpm_manual && !s.is_orphaned)
            .take(max);
        for song in needs_bpm {
            match self.fetch_and_store_bpm(song, false).await {
                Ok(_) => stats.bpm_fetched += 1,
                Err(e) => {
                    log::warn!("Prefetch BPM failed for song {}: {}", song.id, e);
                    stats.failed += 1;
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::db::test_support::{test_collection, test_song};
    use crate::db::{Bpm, Song};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_prefetch_backfills_missing_data() {
        let h = harness();
        h.library
            .with_db(|db| {
                db.insert_collection(&test_collection("c1", "owner"))?;
                db.insert_song(&test_song("c1", "fresh"))?;

                let mut customized = test_song("c1", "custom");
                customized.is_customized = true;
                customized.lyrics_fetched = true;
                customized.bpm = Bpm::Tempo(100);
                db.insert_song(&customized)?;

                let mut manual = test_song("c1", "manual");
                manual.lyrics_fetched = true;
                manual.bpm_manual = true;
                db.insert_song(&manual)?;
                Ok(())
            })
            .unwrap();

        let stats = h.library.prefetch_collection("c1").await;
        assert_eq!(stats.lyrics_fetched, 1);
        assert_eq!(stats.bpm_fetched, 1);
        assert_eq!(h.lyrics.call_count(), 1);
        assert_eq!(h.bpm.calls.load(Ordering::SeqCst), 1);

        let fresh = h
            .library
            .with_db(|db| Ok(db.get_song(&Song::make_id("c1", "fresh"))?))
            .unwrap()
            .unwrap();
        assert!(fresh.lyrics_fetched);
        assert_eq!(fresh.bpm, Bpm::Tempo(128));

        // Nothing left to do
        let again = h.library.prefetch_collection("c1").await;
        assert_eq!(again.lyrics_fetched + again.bpm_fetched, 0);
    }

    #[tokio::test]
    async fn test_prefetch_respects_limit() {
        let h = harness();
        h.library
            .with_db(|db| {
                db.insert_collection(&test_collection("c1", "owner"))?;
                for i in 0..5 {
                    db.insert_song(&test_song("c1", &format!("t{}", i)))?;
                }
                Ok(())
            })
            .unwrap();

        let mut limited = h.library.clone();
        limited.prefetch.max_songs = 2;
        let stats = limited.prefetch_collection("c1").await;
        assert_eq!(stats.lyrics_fetched, 2);
        assert_eq!(stats.bpm_fetched, 2);
    }
}
