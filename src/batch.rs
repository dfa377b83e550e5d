//! Size-bounded submission of matched tracks to the user's library.
//!
//! Ids accumulate in a pending batch that is flushed as soon as it holds
//! [`BATCH_CAPACITY`] ids and once more at end of stream. A failed flush keeps
//! the batch intact so the ids are never silently discarded by `flush` itself.
//!
//! If a full batch cannot be flushed, the next `accept` retries it once and,
//! if that also fails, drops the stuck ids (logged and counted) so the run
//! keeps making progress without ever exceeding the capacity.

use log::{error, info};
use rustc_hash::FxHashSet;

use crate::error::{LoaderError, Result};
use crate::models::{LoadMode, MatchOutcome};
use crate::spotify::LibraryWriter;

/// Spotify accepts at most 50 ids per "save tracks" request.
pub const BATCH_CAPACITY: usize = 50;

/// What `accept` did with one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// `NoMatch`; nothing to submit.
    Ignored,
    /// Album mode: the album was already queued or saved.
    DuplicateAlbum,
    Queued,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitStats {
    pub flushes: usize,
    pub flush_failures: usize,
    pub submitted: usize,
    pub dropped: usize,
}

pub struct BatchSubmitter<'a, W: LibraryWriter + ?Sized> {
    writer: &'a W,
    mode: LoadMode,
    pending: Vec<String>,
    added_albums: FxHashSet<String>,
    stats: SubmitStats,
}

impl<'a, W: LibraryWriter + ?Sized> BatchSubmitter<'a, W> {
    pub fn new(writer: &'a W, mode: LoadMode) -> Self {
        Self {
            writer,
            mode,
            pending: Vec::with_capacity(BATCH_CAPACITY),
            added_albums: FxHashSet::default(),
            stats: SubmitStats::default(),
        }
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn stats(&self) -> SubmitStats {
        self.stats
    }

    pub fn has_album(&self, album_id: &str) -> bool {
        self.added_albums.contains(album_id)
    }

    /// Queues a matched track, flushing synchronously when the batch fills up.
    ///
    /// An `Err` means the flush triggered by this call failed; the track itself
    /// was still queued.
    pub fn accept(&mut self, outcome: &MatchOutcome) -> Result<Acceptance> {
        let MatchOutcome::Matched { track_id, album_id } = outcome else {
            return Ok(Acceptance::Ignored);
        };

        if self.mode == LoadMode::AlbumMatch && !self.added_albums.insert(album_id.clone()) {
            return Ok(Acceptance::DuplicateAlbum);
        }

        if self.pending.len() >= BATCH_CAPACITY {
            self.unstick();
        }

        self.pending.push(track_id.clone());
        if self.pending.len() == BATCH_CAPACITY {
            self.flush()?;
        }
        Ok(Acceptance::Queued)
    }

    /// Sends every pending id in one request. On failure the batch is left
    /// unchanged and the error is returned; nothing is retried here.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        info!("Sending {} tracks", self.pending.len());
        match self.writer.save_tracks(&self.pending) {
            Ok(()) => {
                self.stats.flushes += 1;
                self.stats.submitted += self.pending.len();
                self.pending.clear();
                Ok(())
            }
            Err(err) => {
                self.stats.flush_failures += 1;
                Err(err)
            }
        }
    }

    /// End-of-stream flush. On failure the unsent ids are handed back inside
    /// [`LoaderError::Unsent`]; the stats are returned either way.
    pub fn finish(mut self) -> (SubmitStats, Result<()>) {
        let result = self.flush().map_err(|source| LoaderError::Unsent {
            unsent: std::mem::take(&mut self.pending),
            source: Box::new(source),
        });
        (self.stats, result)
    }

    /// Full batch left behind by a failed flush: retry once, then drop it.
    fn unstick(&mut self) {
        if let Err(err) = self.flush() {
            error!(
                "Dropping {} unsent tracks after repeated flush failure ({}): {}",
                self.pending.len(),
                err,
                self.pending.join(",")
            );
            self.stats.dropped += self.pending.len();
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records every submitted batch; fails while `failures` is non-zero.
    #[derive(Default)]
    struct RecordingWriter {
        batches: RefCell<Vec<Vec<String>>>,
        failures: RefCell<usize>,
    }

    impl RecordingWriter {
        fn failing(times: usize) -> Self {
            Self {
                failures: RefCell::new(times),
                ..Default::default()
            }
        }
    }

    impl LibraryWriter for RecordingWriter {
        fn save_tracks(&self, ids: &[String]) -> Result<()> {
            let mut failures = self.failures.borrow_mut();
            if *failures > 0 {
                *failures -= 1;
                return Err(LoaderError::Remote {
                    status: 500,
                    message: "Server error".to_string(),
                });
            }
            self.batches.borrow_mut().push(ids.to_vec());
            Ok(())
        }
    }

    fn matched(track: &str, album: &str) -> MatchOutcome {
        MatchOutcome::Matched {
            track_id: track.to_string(),
            album_id: album.to_string(),
        }
    }

    #[test]
    fn test_no_match_is_ignored() {
        let writer = RecordingWriter::default();
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::TitleMatch);
        assert_eq!(
            submitter.accept(&MatchOutcome::NoMatch).unwrap(),
            Acceptance::Ignored
        );
        assert!(submitter.pending().is_empty());
        let (stats, result) = submitter.finish();
        result.unwrap();
        assert_eq!(stats.flushes, 0);
        assert!(writer.batches.borrow().is_empty());
    }

    #[test]
    fn test_flush_exactly_at_capacity() {
        let writer = RecordingWriter::default();
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::TitleMatch);

        for i in 0..BATCH_CAPACITY - 1 {
            submitter.accept(&matched(&format!("t{i}"), "a")).unwrap();
        }
        assert!(writer.batches.borrow().is_empty());
        assert_eq!(submitter.pending().len(), BATCH_CAPACITY - 1);

        submitter.accept(&matched("t49", "a")).unwrap();
        assert_eq!(writer.batches.borrow().len(), 1);
        assert_eq!(writer.batches.borrow()[0].len(), BATCH_CAPACITY);
        assert_eq!(writer.batches.borrow()[0][0], "t0");
        assert!(submitter.pending().is_empty());
    }

    #[test]
    fn test_album_mode_dedupes_regardless_of_order() {
        let writer = RecordingWriter::default();
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::AlbumMatch);

        assert_eq!(submitter.accept(&matched("t2", "A1")).unwrap(), Acceptance::Queued);
        assert_eq!(submitter.accept(&matched("t9", "A2")).unwrap(), Acceptance::Queued);
        assert_eq!(
            submitter.accept(&matched("t1", "A1")).unwrap(),
            Acceptance::DuplicateAlbum
        );
        assert_eq!(submitter.pending(), ["t2".to_string(), "t9".to_string()]);
        assert!(submitter.has_album("A1"));
    }

    #[test]
    fn test_title_mode_keeps_same_album_tracks() {
        let writer = RecordingWriter::default();
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::TitleMatch);
        submitter.accept(&matched("t1", "A1")).unwrap();
        submitter.accept(&matched("t2", "A1")).unwrap();
        assert_eq!(submitter.pending().len(), 2);
    }

    #[test]
    fn test_failed_flush_retains_ids() {
        let writer = RecordingWriter::failing(1);
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::TitleMatch);
        submitter.accept(&matched("t1", "a")).unwrap();
        submitter.accept(&matched("t2", "a")).unwrap();

        assert!(submitter.flush().is_err());
        assert_eq!(submitter.pending(), ["t1".to_string(), "t2".to_string()]);
        assert_eq!(submitter.stats().flush_failures, 1);

        // Retry by the caller succeeds with the same ids.
        submitter.flush().unwrap();
        assert_eq!(writer.batches.borrow()[0], vec!["t1", "t2"]);
        assert!(submitter.pending().is_empty());
    }

    #[test]
    fn test_accept_continues_after_failed_flush() {
        let writer = RecordingWriter::failing(1);
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::TitleMatch);
        for i in 0..BATCH_CAPACITY - 1 {
            submitter.accept(&matched(&format!("t{i}"), "a")).unwrap();
        }
        assert!(submitter.accept(&matched("t49", "a")).is_err());
        assert_eq!(submitter.pending().len(), BATCH_CAPACITY);

        // Next accept retries the stuck batch before appending.
        assert_eq!(submitter.accept(&matched("t50", "a")).unwrap(), Acceptance::Queued);
        assert_eq!(writer.batches.borrow().len(), 1);
        assert_eq!(writer.batches.borrow()[0].len(), BATCH_CAPACITY);
        assert_eq!(submitter.pending(), ["t50".to_string()]);
        assert_eq!(submitter.stats().dropped, 0);
    }

    #[test]
    fn test_stuck_batch_is_dropped_after_second_failure() {
        let writer = RecordingWriter::failing(2);
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::TitleMatch);
        for i in 0..BATCH_CAPACITY {
            let _ = submitter.accept(&matched(&format!("t{i}"), "a"));
        }
        submitter.accept(&matched("next", "a")).unwrap();

        assert_eq!(submitter.pending(), ["next".to_string()]);
        assert!(submitter.pending().len() <= BATCH_CAPACITY);
        assert_eq!(submitter.stats().dropped, BATCH_CAPACITY);
        assert_eq!(submitter.stats().flush_failures, 2);
    }

    #[test]
    fn test_finish_reports_unsent_ids() {
        let writer = RecordingWriter::failing(1);
        let mut submitter = BatchSubmitter::new(&writer, LoadMode::TitleMatch);
        submitter.accept(&matched("t1", "a")).unwrap();

        let (stats, result) = submitter.finish();
        assert_eq!(stats.flush_failures, 1);
        match result {
            Err(LoaderError::Unsent { unsent, source }) => {
                assert_eq!(unsent, vec!["t1".to_string()]);
                assert!(matches!(*source, LoaderError::Remote { status: 500, .. }));
            }
            other => panic!("expected Unsent, got {:?}", other),
        }
    }
}
