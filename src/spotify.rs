//! Spotify Web API client: catalog search and saving tracks to the library.
//!
//! Search issues one fielded query per local track and returns exactly one
//! page of track candidates. No retries, pagination or caching.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::config::LoaderConfig;
use crate::credentials::CredentialProvider;
use crate::error::{LoaderError, Result};
use crate::models::CandidateTrack;
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

/// Collapses tabs/newlines/repeated spaces inside tag values.
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Longest body excerpt carried into an error message.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Fuzzy catalog search for a local `(artist, album, title)` triple.
pub trait TrackSearch {
    fn search(&self, artist: &str, album: &str, title: &str) -> Result<Vec<CandidateTrack>>;
}

/// Remote "save tracks to library" endpoint.
pub trait LibraryWriter {
    fn save_tracks(&self, ids: &[String]) -> Result<()>;
}

// ============================================================================
// API Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<Option<ApiTrack>>, // Spotify occasionally returns null entries
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: Option<String>, // null for local files
    #[serde(default)]
    name: String,
    #[serde(default)]
    album: ApiAlbum,
    #[serde(default)]
    artists: Vec<ApiArtist>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiAlbum {
    id: Option<String>,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    #[serde(default)]
    name: String,
}

impl ApiTrack {
    fn into_candidate(self) -> Option<CandidateTrack> {
        let artist_name = self
            .artists
            .into_iter()
            .next()
            .map(|artist| artist.name)
            .unwrap_or_default();
        Some(CandidateTrack {
            id: self.id?,
            name: self.name,
            album_name: self.album.name,
            album_id: self.album.id.unwrap_or_default(),
            artist_name,
        })
    }
}

// ============================================================================
// Query Building
// ============================================================================

fn clean_term(value: &str) -> String {
    WHITESPACE_RUN.replace_all(value.trim(), " ").into_owned()
}

/// Builds the fielded search string, e.g. `artist:Radiohead album:OK Computer track:Airbag`.
/// Empty fields are left out; returns `None` when nothing is left to search for.
pub fn build_search_query(artist: &str, album: &str, title: &str) -> Option<String> {
    let terms: Vec<String> = [("artist", artist), ("album", album), ("track", title)]
        .into_iter()
        .map(|(field, value)| (field, clean_term(value)))
        .filter(|(_, value)| !value.is_empty())
        .map(|(field, value)| format!("{field}:{value}"))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Maps a remote error payload (even on a 2xx status) or a bare failure status
/// into [`LoaderError::Remote`].
fn check_response(response: &ApiResponse) -> Result<()> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&response.body) {
        if !envelope.error.message.is_empty() {
            let status = if envelope.error.status != 0 {
                envelope.error.status
            } else {
                response.status
            };
            return Err(LoaderError::Remote {
                status,
                message: envelope.error.message,
            });
        }
    }

    if !response.is_success() {
        return Err(LoaderError::Remote {
            status: response.status,
            message: response.body.chars().take(ERROR_EXCERPT_CHARS).collect(),
        });
    }
    Ok(())
}

// ============================================================================
// Client
// ============================================================================

pub struct SpotifyClient {
    config: LoaderConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
}

impl SpotifyClient {
    pub fn new(
        config: LoaderConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
        }
    }

    /// Sends an authenticated request and returns the checked response.
    fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let token = self.credentials.bearer_token()?;
        let response = self.transport.send(&request.bearer(token))?;
        check_response(&response)?;
        Ok(response)
    }
}

impl TrackSearch for SpotifyClient {
    fn search(&self, artist: &str, album: &str, title: &str) -> Result<Vec<CandidateTrack>> {
        let Some(query) = build_search_query(artist, album, title) else {
            return Ok(Vec::new());
        };

        let request = ApiRequest::new(Method::Get, self.config.api_url("/search"))
            .query("q", query)
            .query("type", "track")
            .query("market", self.config.market.as_str());
        let response = self.execute(request)?;

        let parsed: SearchResponse =
            serde_json::from_str(&response.body).map_err(|source| LoaderError::Decode {
                context: "search response".to_string(),
                source,
            })?;

        Ok(parsed
            .tracks
            .items
            .into_iter()
            .flatten()
            .filter_map(ApiTrack::into_candidate)
            .collect())
    }
}

impl LibraryWriter for SpotifyClient {
    fn save_tracks(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let request = ApiRequest::new(Method::Put, self.config.api_url("/me/tracks"))
            .query("ids", ids.join(","));
        self.execute(request).map(|_| ())
    }
}
