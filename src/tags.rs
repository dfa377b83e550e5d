//! Local library walker and tag reader.
//!
//! A producer thread walks the given roots in lexical order, reads embedded
//! tags with `lofty` and hands `LocalTrack` records to the matcher through a
//! bounded channel. Per-file failures are logged and skipped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use lofty::file::{TaggedFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::probe::Probe;
use lofty::tag::Tag;
use log::{debug, warn};

use crate::models::LocalTrack;

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 11] = [
    "mp3", "flac", "ogg", "opus", "m4a", "mp4", "aac", "wav", "aiff", "wv", "ape",
];

pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

// ============================================================================
// Tag Reading
// ============================================================================

fn first_non_empty<F>(tagged_file: &TaggedFile, extractor: F) -> String
where
    F: Fn(&Tag) -> Option<String>,
{
    tagged_file
        .primary_tag()
        .into_iter()
        .chain(tagged_file.tags().iter())
        .filter_map(|tag| extractor(tag))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Reads artist/album/title tags. Calls are serialized through one lock so
/// the underlying parser never runs concurrently; the lock covers only the
/// read itself.
#[derive(Default)]
pub struct TagReader {
    lock: Mutex<()>,
}

impl TagReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the file cannot be parsed or carries no tags at all.
    pub fn read(&self, path: &Path) -> Option<LocalTrack> {
        let tagged_file = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            Probe::open(path).and_then(|probe| probe.read())
        };

        let tagged_file = match tagged_file {
            Ok(tagged_file) => tagged_file,
            Err(err) => {
                debug!("Skipping file {}: {}", path.display(), err);
                return None;
            }
        };

        if tagged_file.tags().is_empty() {
            debug!("Skipping file {}: no tags", path.display());
            return None;
        }

        Some(LocalTrack {
            artist: first_non_empty(&tagged_file, |tag| {
                tag.artist().map(|value| value.into_owned())
            }),
            album: first_non_empty(&tagged_file, |tag| {
                tag.album().map(|value| value.into_owned())
            }),
            title: first_non_empty(&tagged_file, |tag| {
                tag.title().map(|value| value.into_owned())
            }),
        })
    }
}

// ============================================================================
// Directory Walk
// ============================================================================

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub audio_files: usize,
    pub tracks: usize,
    pub skipped: usize,
}

struct Walker<'a> {
    reader: &'a TagReader,
    sender: &'a Sender<LocalTrack>,
    stats: WalkStats,
}

impl Walker<'_> {
    /// Returns false once the receiving side has gone away.
    fn visit(&mut self, path: &Path) -> bool {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Failed to inspect {}: {}", path.display(), err);
                return true;
            }
        };

        if metadata.is_dir() {
            return self.visit_dir(path);
        }
        if !metadata.is_file() || !is_supported_audio_file(path) {
            return true;
        }

        self.stats.audio_files += 1;
        match self.reader.read(path) {
            Some(track) => {
                self.stats.tracks += 1;
                self.sender.send(track).is_ok()
            }
            None => {
                self.stats.skipped += 1;
                true
            }
        }
    }

    fn visit_dir(&mut self, directory: &Path) -> bool {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to read directory {}: {}", directory.display(), err);
                return true;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    warn!(
                        "Failed to read a directory entry in {}: {}",
                        directory.display(),
                        err
                    );
                    None
                }
            })
            .collect();
        paths.sort_unstable();

        paths.iter().all(|path| self.visit(path))
    }
}

/// Tag records streamed from a background walker thread.
pub struct TagSource {
    receiver: Receiver<LocalTrack>,
    worker: JoinHandle<WalkStats>,
}

impl TagSource {
    /// Starts walking `roots` on a new thread. At most `capacity` records are
    /// buffered before the walker blocks.
    pub fn spawn(roots: Vec<PathBuf>, reader: Arc<TagReader>, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        let worker = std::thread::spawn(move || {
            let mut walker = Walker {
                reader: &reader,
                sender: &sender,
                stats: WalkStats::default(),
            };
            for root in &roots {
                if !walker.visit(root) {
                    debug!("Track consumer went away, stopping walk");
                    break;
                }
            }
            walker.stats
        });
        Self { receiver, worker }
    }

    /// Blocking iterator over records; ends when the walk is complete.
    pub fn tracks(&self) -> crossbeam_channel::Iter<'_, LocalTrack> {
        self.receiver.iter()
    }

    /// Waits for the walker thread and returns its counters.
    pub fn join(self) -> WalkStats {
        drop(self.receiver);
        self.worker.join().unwrap_or_else(|_| {
            warn!("Tag walker thread panicked");
            WalkStats::default()
        })
    }
}
