// Spotify user connection - OAuth state, token storage and refresh

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::thread_rng;
use serde::Serialize;

use super::Library;
use crate::auth::Identity;
use crate::db::{format_timestamp, parse_timestamp, NewAuditEntry, SpotifyToken};
use crate::error::{AppError, AppResult};
use crate::spotify::is_spotify_id;
use crate::spotify::oauth::TokenGrant;

/// How long an authorize round trip may take
const STATE_TTL_SECS: i64 = 600;
/// Refresh access tokens this close to expiry
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize)]
pub struct SpotifyAccessToken {
    pub access_token: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SpotifyStatus {
    pub connected: bool,
    pub expires_at: Option<i64>,
    pub display_name: Option<String>,
    pub product: Option<String>,
}

/// 256 random bits, hex-encoded
fn generate_state() -> String {
    let mut rng = thread_rng();
    (0..32).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

fn state_is_fresh(created_at: &str, now: DateTime<Utc>) -> bool {
    parse_timestamp(created_at)
        .map(|ts| now - ts <= Duration::seconds(STATE_TTL_SECS))
        .unwrap_or(false)
}

fn needs_refresh(token: &SpotifyToken, now: i64) -> bool {
    token.expires_at - now <= REFRESH_MARGIN_SECS
}

/// Turn a token grant into a stored token. Spotify may omit the refresh
/// token and scope on refresh; the previous ones then stay valid.
fn token_from_grant(grant: TokenGrant, previous: Option<&SpotifyToken>, now: i64) -> SpotifyToken {
    SpotifyToken {
        access_token: grant.access_token,
        refresh_token: grant
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        expires_at: now + grant.expires_in,
        scope: grant
            .scope
            .or_else(|| previous.map(|p| p.scope.clone()))
            .unwrap_or_default(),
    }
}

impl Library {
    /// Start the authorize flow: remember a fresh state for the caller and
    /// return the consent URL
    pub fn spotify_auth_url(&self, caller: &Identity, show_dialog: bool) -> AppResult<String> {
        let state = generate_state();
        let expired_before = format_timestamp(Utc::now() - Duration::seconds(STATE_TTL_SECS));
        self.with_db(|db| Ok(db.save_oauth_state(&state, &caller.uid, &expired_before)?))?;
        Ok(self.spotify_auth.authorize_url(&state, show_dialog)?)
    }

    /// Finish the authorize flow. Returns the uid of the user who started it.
    pub async fn spotify_callback(&self, code: &str, state: &str) -> AppResult<String> {
        let found = self.with_db(|db| Ok(db.take_oauth_state(state)?))?;
        let Some(found) = found.filter(|s| state_is_fresh(&s.created_at, Utc::now())) else {
            return Err(AppError::BadRequest(
                "Invalid or expired authorization state".to_string(),
            ));
        };
        let uid = found.user_uid;

        let grant = self.spotify_auth.exchange_code(code).await.map_err(|e| {
            log::warn!("Spotify code exchange failed for {}: {}", uid, e);
            AppError::from(e)
        })?;
        let token = token_from_grant(grant, None, Utc::now().timestamp());
        self.with_db(|db| Ok(db.save_spotify_token(&uid, &token)?))?;

        match self.spotify_auth.profile(&token.access_token).await {
            Ok(profile) => {
                self.with_db(|db| Ok(db.update_spotify_profile(&uid, &profile)?))?;
            }
            Err(e) => log::warn!("Could not load Spotify profile for {}: {}", uid, e),
        }

        let email = self
            .with_db(|db| Ok(db.get_user(&uid)?))?
            .map(|u| u.email)
            .unwrap_or_default();
        self.record(NewAuditEntry {
            user_id: uid.clone(),
            user_email: email,
            action: "spotify_connect".to_string(),
            resource_type: "user".to_string(),
            resource_id: uid.clone(),
            ..Default::default()
        });
        log::info!("Spotify connected for user {}", uid);
        Ok(uid)
    }

    /// A usable access token for the Web Playback SDK, refreshed when close to expiry
    pub async fn spotify_access_token(&self, caller: &Identity) -> AppResult<SpotifyAccessToken> {
        let stored = self
            .with_db(|db| Ok(db.get_spotify_token(&caller.uid)?))?
            .ok_or_else(|| AppError::NotFound("Spotify is not connected".to_string()))?;

        let now = Utc::now().timestamp();
        if !needs_refresh(&stored, now) {
            return Ok(SpotifyAccessToken {
                access_token: stored.access_token,
                expires_at: stored.expires_at,
            });
        }

        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            // Expired with no way to renew; the user has to connect again
            self.with_db(|db| Ok(db.delete_spotify_token(&caller.uid)?))?;
            return Err(AppError::NotFound("Spotify is not connected".to_string()));
        };
        let grant = self.spotify_auth.refresh(refresh_token).await.map_err(|e| {
            log::warn!("Spotify token refresh failed for {}: {}", caller.uid, e);
            AppError::from(e)
        })?;
        let token = token_from_grant(grant, Some(&stored), now);
        self.with_db(|db| Ok(db.save_spotify_token(&caller.uid, &token)?))?;
        Ok(SpotifyAccessToken {
            access_token: token.access_token,
            expires_at: token.expires_at,
        })
    }

    pub fn spotify_status(&self, caller: &Identity) -> AppResult<SpotifyStatus> {
        self.with_db(|db| {
            let Some(token) = db.get_spotify_token(&caller.uid)? else {
                return Ok(SpotifyStatus::default());
            };
            let user = db.get_user(&caller.uid)?;
            Ok(SpotifyStatus {
                connected: true,
                expires_at: Some(token.expires_at),
                display_name: user.as_ref().and_then(|u| u.spotify_display_name.clone()),
                product: user.and_then(|u| u.spotify_product),
            })
        })
    }

    /// Forget the caller's Spotify token. Returns false if none was stored.
    pub fn spotify_disconnect(&self, caller: &Identity) -> AppResult<bool> {
        let removed = self.with_db(|db| Ok(db.delete_spotify_token(&caller.uid)?))?;
        if removed {
            self.record(super::audit::audit_entry(
                caller,
                "spotify_disconnect",
                "user",
                &caller.uid,
            ));
        }
        Ok(removed)
    }

    /// 30 second preview clip of a track, if Spotify has one
    pub async fn track_preview(&self, track_id: &str) -> AppResult<Option<String>> {
        if !is_spotify_id(track_id) {
            return Err(AppError::BadRequest("Invalid track id".to_string()));
        }
        Ok(self.spotify.track_preview(track_id).await?)
    }
}
