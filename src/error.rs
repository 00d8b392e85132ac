use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop a song from being loaded or a session from starting.
#[derive(Error, Debug)]
pub enum GameError {
    #[error("Failed to read MIDI file {path}: {reason}")]
    FileUnreadable { path: PathBuf, reason: String },

    #[error("Malformed MIDI timing: {0}")]
    MalformedTiming(String),

    #[error("SMPTE timecode midi timing is not currently supported")]
    UnsupportedTiming,

    #[error("Track {track} has no playable note events")]
    TrackUnavailable { track: usize },

    #[error("This song is not suitable for {players} player(s)")]
    UnsuitableForPlayerCount { players: u8 },

    #[error("MIDI port error: {0}")]
    Port(String),
}

pub type GameResult<T> = Result<T, GameError>;
