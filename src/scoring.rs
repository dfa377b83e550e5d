//! Candidate scoring and best-match selection.
//!
//! A candidate's score is the sum of the edit distances between the local
//! artist/album/title and the candidate's first artist/album/name. Lower is
//! better. There is no acceptance threshold: any non-empty candidate list
//! yields a match.

use log::info;

use crate::models::{CandidateTrack, LoadMode, LocalTrack, MatchOutcome};

/// Case-sensitive Levenshtein distance over Unicode scalar values
/// (insert, delete, substitute; no transpositions).
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Combined distance between a local track and one candidate.
pub fn match_score(query: &LocalTrack, candidate: &CandidateTrack) -> usize {
    edit_distance(&query.artist, &candidate.artist_name)
        + edit_distance(&query.album, &candidate.album_name)
        + edit_distance(&query.title, &candidate.name)
}

/// Candidate with the lowest score; the first one seen wins ties.
pub fn best_candidate<'a>(
    query: &LocalTrack,
    candidates: &'a [CandidateTrack],
) -> Option<(&'a CandidateTrack, usize)> {
    let mut best: Option<(&CandidateTrack, usize)> = None;
    for candidate in candidates {
        let score = match_score(query, candidate);
        // Strict comparison keeps the earliest candidate on ties.
        if best.map_or(true, |(_, low)| score < low) {
            best = Some((candidate, score));
        }
    }
    best
}

/// Picks the best candidate for `query` and logs the decision.
pub fn select(query: &LocalTrack, candidates: &[CandidateTrack], mode: LoadMode) -> MatchOutcome {
    match best_candidate(query, candidates) {
        Some((track, score)) => {
            let verb = match mode {
                LoadMode::TitleMatch => "Adding",
                LoadMode::AlbumMatch => "Adding from album",
            };
            info!(
                "{} {} - {} - {} (distance {})",
                verb, track.artist_name, track.album_name, track.name, score
            );
            MatchOutcome::Matched {
                track_id: track.id.clone(),
                album_id: track.album_id.clone(),
            }
        }
        None => {
            info!("No match for {}", query);
            MatchOutcome::NoMatch
        }
    }
}
