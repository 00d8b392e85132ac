use crate::model::config::GameMode;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    SetTempo { micros_per_beat: u32 },
    Meta,
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub delta_ticks: u32,
    pub kind: RawEventKind,
}

impl RawEvent {
    pub fn new(delta_ticks: u32, kind: RawEventKind) -> Self {
        Self { delta_ticks, kind }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RawTrack {
    pub name: Option<String>,
    pub events: Vec<RawEvent>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MidiData {
    pub title: Option<String>,
    pub ticks_per_beat: u32,
    pub tracks: Vec<RawTrack>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    On,
    Off,
}

/// `delay_seconds` is the time since the previously emitted event of the same extraction
/// and may legitimately be zero (chords, or an off and an on sharing a tick).
/// `at_seconds` is the running sum of those delays, measured from the start of the track.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub kind: NoteKind,
    pub note: u8,
    pub velocity: u8,
    pub delay_seconds: f64,
    pub at_seconds: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SongEntry {
    pub id: u32,
    pub file_path: String,
    pub display_name: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default = "default_player_count")]
    pub player_count: u8,
}

fn default_player_count() -> u8 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Catalog {
    pub songs: Vec<SongEntry>,
}

impl Catalog {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn find(&self, id: u32) -> Option<&SongEntry> {
        self.songs.iter().find(|s| s.id == id)
    }

    pub fn filter(&self, mode: GameMode, players: u8) -> Vec<&SongEntry> {
        self.songs
            .iter()
            .filter(|song| match mode {
                GameMode::Practice => song.difficulty == Difficulty::Easy,
                GameMode::Challenge if players == 2 => song.player_count == 2,
                _ => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CATALOG: &str = r#"{
        "songs": [
            { "id": 1, "file_path": "songs/twinkle.mid", "display_name": "Twinkle", "difficulty": "Easy" },
            { "id": 2, "file_path": "songs/heart_and_soul.mid", "display_name": "Heart and Soul",
              "difficulty": "Medium", "player_count": 2 },
            { "id": 3, "file_path": "songs/fur_elise.mid", "display_name": "Fur Elise",
              "artist": "Beethoven", "difficulty": "Hard" }
        ]
    }"#;

    #[test]
    fn catalog_filters_by_mode_and_players() {
        env_logger::try_init().unwrap_or(());

        let catalog = Catalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.songs.len(), 3);
        assert_eq!(catalog.find(3).unwrap().artist.as_deref(), Some("Beethoven"));

        let practice = catalog.filter(GameMode::Practice, 1);
        assert_eq!(practice.len(), 1);
        assert_eq!(practice[0].id, 1);

        let duet = catalog.filter(GameMode::Challenge, 2);
        assert_eq!(duet.len(), 1);
        assert_eq!(duet[0].id, 2);

        assert_eq!(catalog.filter(GameMode::Challenge, 1).len(), 3);
        assert_eq!(catalog.filter(GameMode::JukeBox, 2).len(), 3);
    }
}
