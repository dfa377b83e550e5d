//! Drives local tracks through search, selection and batch submission.
//!
//! Tracks are handled strictly in arrival order on the calling thread; the
//! batch submitter is owned here and never shared.

use std::time::Instant;

use log::{debug, error, warn};

use crate::batch::{Acceptance, BatchSubmitter};
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::models::{LoadMode, LocalTrack, MatchOutcome, RunStats};
use crate::progress::{create_spinner, log_progress};
use crate::scoring::select;
use crate::spotify::{LibraryWriter, TrackSearch};

/// Matches and submits every track, then flushes the remaining batch.
///
/// Search and intermediate flush failures are logged and counted; only a
/// failed final flush is returned, as [`crate::error::LoaderError::Unsent`].
pub fn run<I, S, W>(tracks: I, mode: LoadMode, search: &S, writer: &W) -> Result<RunStats>
where
    I: IntoIterator<Item = LocalTrack>,
    S: TrackSearch + ?Sized,
    W: LibraryWriter + ?Sized,
{
    let progress_interval = LoaderConfig::default().progress_interval;
    run_with_progress(tracks, mode, search, writer, progress_interval)
}

pub fn run_with_progress<I, S, W>(
    tracks: I,
    mode: LoadMode,
    search: &S,
    writer: &W,
    progress_interval: u64,
) -> Result<RunStats>
where
    I: IntoIterator<Item = LocalTrack>,
    S: TrackSearch + ?Sized,
    W: LibraryWriter + ?Sized,
{
    let start = Instant::now();
    let spinner = create_spinner("Matching tracks");
    let mut stats = RunStats::default();
    let mut submitter = BatchSubmitter::new(writer, mode);

    for track in tracks {
        stats.tracks_seen += 1;
        spinner.inc(1);
        log_progress("match", stats.tracks_seen as u64, progress_interval.max(1));

        let candidates = match search.search(&track.artist, &track.album, &track.title) {
            Ok(candidates) => candidates,
            Err(err) => {
                if err.is_remote() {
                    warn!("Search failed for {}: {}", track, err);
                } else {
                    error!("Search failed for {}: {}", track, err);
                }
                stats.search_failures += 1;
                continue;
            }
        };

        let outcome = select(&track, &candidates, mode);
        let album_id = match &outcome {
            MatchOutcome::Matched { album_id, .. } => {
                stats.matched += 1;
                album_id.as_str()
            }
            MatchOutcome::NoMatch => {
                stats.no_match += 1;
                continue;
            }
        };

        match submitter.accept(&outcome) {
            Ok(Acceptance::Queued) => stats.queued += 1,
            Ok(Acceptance::DuplicateAlbum) => {
                debug!("Album {} already added", album_id);
                stats.album_duplicates += 1;
            }
            Ok(Acceptance::Ignored) => {}
            Err(err) => {
                // The id stays queued; the failed batch is retried on the next accept.
                stats.queued += 1;
                error!("Saving tracks failed: {}", err);
            }
        }
    }

    let (submit_stats, result) = submitter.finish();
    spinner.finish_with_message(format!(
        "Matched {} of {} tracks",
        stats.matched, stats.tracks_seen
    ));

    stats.flushes = submit_stats.flushes;
    stats.flush_failures = submit_stats.flush_failures;
    stats.submitted = submit_stats.submitted;
    stats.dropped = submit_stats.dropped;
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    stats.log_phase("run");

    result.map(|()| stats)
}
