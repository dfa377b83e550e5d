//! Core data models for the matching pipeline.
//!
//! This module contains the records flowing from the tag walker through the
//! matcher into the batch submitter, plus run statistics.

use serde::Serialize;

// ============================================================================
// Local Library
// ============================================================================

/// Tag record read from one local media file. Missing tags are empty strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalTrack {
    pub artist: String,
    pub album: String,
    pub title: String,
}

impl LocalTrack {
    pub fn new(
        artist: impl Into<String>,
        album: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
            title: title.into(),
        }
    }
}

impl std::fmt::Display for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {} - {}", self.artist, self.album, self.title)
    }
}

// ============================================================================
// Spotify Models
// ============================================================================

/// Search result candidate, flattened from the Spotify track object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CandidateTrack {
    pub id: String,          // Spotify track ID (e.g., "2takcwOaAZWiXQijPHIx7B")
    pub name: String,        // Track title
    pub album_name: String,
    pub album_id: String,
    pub artist_name: String, // First credited artist, "" when none are listed
}

/// Result of scoring one local track against its candidates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { track_id: String, album_id: String },
    NoMatch,
}

/// How matches are submitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LoadMode {
    /// Save every matched track.
    #[default]
    #[value(name = "title")]
    TitleMatch,
    /// Save at most one track per distinct matched album.
    #[value(name = "album")]
    AlbumMatch,
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Counters for one run, logged at the end and optionally written as JSON.
#[derive(Default, Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub tracks_seen: usize,
    pub search_failures: usize,
    pub no_match: usize,
    pub matched: usize,
    pub album_duplicates: usize,
    pub queued: usize,

    // Batch submission
    pub flushes: usize,
    pub flush_failures: usize,
    pub submitted: usize,
    pub dropped: usize,

    pub elapsed_seconds: f64,
}

impl RunStats {
    /// Percentage of seen tracks that resolved to a candidate.
    pub fn match_rate(&self) -> f64 {
        if self.tracks_seen == 0 {
            0.0
        } else {
            100.0 * self.matched as f64 / self.tracks_seen as f64
        }
    }

    /// Log stats in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            log::info!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
