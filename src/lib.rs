//! Track loader library - matches a local music library against the Spotify
//! catalog and saves the best match for every track to the user's library.

pub mod batch;
pub mod config;
pub mod credentials;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod scoring;
pub mod spotify;
pub mod tags;
pub mod transport;
