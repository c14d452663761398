// Modules
pub mod auth;
pub mod bpm;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod lyrics;
pub mod server;
pub mod spotify;

use anyhow::Context;
use std::sync::Arc;

use auth::StaticTokenVerifier;
use bpm::GetSongBpmClient;
use config::Config;
use db::Database;
use library::{Library, Services};
use lyrics::GeniusClient;
use server::AppState;
use spotify::SpotifyClient;
use spotify::oauth::SpotifyOAuthClient;

/// Open the database, wire up the external clients and serve until Ctrl-C
pub async fn run(config: Config) -> anyhow::Result<()> {
    let db_path = config.database_path()?;
    log::info!("Opening database at {:?}", db_path);
    let db = Database::new(&db_path)
        .with_context(|| format!("Failed to open database at {:?}", db_path))?;
    db.run_migrations().context("Failed to run database migrations")?;

    if config.spotify.client_id.is_none() {
        log::warn!("Spotify credentials are not configured; playlist import will fail");
    }
    if config.auth.tokens.is_empty() {
        log::warn!("No API tokens configured; every request will be rejected");
    }

    let services = Services {
        spotify: Arc::new(SpotifyClient::new(&config.spotify)?),
        spotify_auth: Arc::new(SpotifyOAuthClient::new(&config.spotify)?),
        lyrics: Arc::new(GeniusClient::new(&config.genius, &config.scraper)?),
        bpm: Arc::new(GetSongBpmClient::new(&config.getsongbpm)?),
    };
    let library = Library::new(db, services, config.prefetch.clone());

    let state = Arc::new(AppState {
        library,
        verifier: Arc::new(StaticTokenVerifier::from_config(&config.auth)),
        allowed_users: config.auth.allowed_users.clone(),
    });

    let running = server::start_server(&config.server, state)
        .await
        .map_err(anyhow::Error::msg)?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    running.shutdown().await;
    Ok(())
}
