use crate::util::{parse_game_mode, parse_players};
use anyhow::anyhow;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "WALKING_PIANO",
    about = "Play a MIDI file as a falling-notes piano game!"
)]
pub struct Args {
    /// Path to the target MIDI file. Optional when `--song` picks one from the catalog.
    pub midi: Option<PathBuf>,

    /// Game mode: challenge|practice|freeplay|jukebox. Defaults to challenge.
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Number of players (1 or 2). Two players take tracks 0 and 1.
    #[arg(short, long)]
    pub players: Option<u8>,

    /// MIDI input port to read the keyboard from. Any part of the port name will do.
    #[arg(short, long)]
    pub input: Option<String>,

    /// MIDI output port to send notes to. Playback is silent without one.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Print the available MIDI ports and exit.
    #[arg(long, default_value_t = false)]
    pub list_ports: bool,

    /// Let the game play the falling notes itself.
    #[arg(short, long, default_value_t = false)]
    pub autoplay: bool,

    /// Multiplier applied to every microseconds-per-beat value (above 1.0 plays slower).
    #[arg(long = "tempo-scale")]
    pub tempo_scale: Option<f64>,

    /// Tempo used before the first tempo marker, in beats per minute.
    #[arg(long = "default-bpm")]
    pub default_bpm: Option<f64>,

    /// JSON file with game settings. Command line flags take precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// JSON song catalog.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Catalog id of the song to play.
    #[arg(short, long)]
    pub song: Option<u32>,

    /// Dry run (print first dry_run_max events and exit).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum events to print in dry run.
    #[arg(long, default_value_t = 80)]
    pub dry_run_max: usize,

    /// Prints extra information to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameMode {
    #[default]
    Challenge,
    Practice,
    FreePlay,
    JukeBox,
}

impl GameMode {
    /// Modes that drop notes down the screen and drive them with the scheduler.
    pub fn has_falling_notes(self) -> bool {
        matches!(self, GameMode::Challenge | GameMode::Practice)
    }

    pub fn listens_to_input(self) -> bool {
        !matches!(self, GameMode::JukeBox)
    }
}

/// What resume() does with a task whose deadline passed while the clock was paused.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedTaskPolicy {
    /// Discard it. A held note's NoteOff lost this way leaves the note growing until teardown.
    #[default]
    Drop,
    /// Fire it on the first frame after resuming.
    FireOnResume,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub points_okay: u64,
    pub points_perfect: u64,
    /// Awarded every score tick for each held key whose note is in a hit window.
    pub points_hold: u64,
    pub score_tick_seconds: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            points_okay: 50,
            points_perfect: 100,
            points_hold: 10,
            score_tick_seconds: 0.25,
        }
    }
}

/// Screen geometry the falling notes move through, in pixels with y growing upwards.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Geometry {
    pub hit_line_y: f64,
    pub spawn_y: f64,
    pub fall_speed: f64,
    pub okay_band: f64,
    pub perfect_band: f64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            hit_line_y: 245.0,
            spawn_y: 845.0,
            fall_speed: 150.0,
            okay_band: 70.0,
            perfect_band: 20.0,
        }
    }
}

impl Geometry {
    /// Seconds a leading edge needs to travel from the spawn line to the hit line.
    pub fn travel_seconds(&self) -> f64 {
        (self.spawn_y - self.hit_line_y).max(0.0) / self.fall_speed
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub mode: GameMode,
    pub players: u8,
    pub autoplay: bool,
    pub tempo_scale: f64,
    pub default_bpm: Option<f64>,
    pub frame_rate: f64,
    pub end_of_song_buffer_seconds: f64,
    pub input_poll_micros: u64,
    pub join_timeout_ms: u64,
    pub missed_task_policy: MissedTaskPolicy,
    pub scoring: ScoringConfig,
    pub geometry: Geometry,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::Challenge,
            players: 1,
            autoplay: false,
            tempo_scale: 1.0,
            default_bpm: None,
            frame_rate: 60.0,
            end_of_song_buffer_seconds: 7.0,
            input_poll_micros: 100,
            join_timeout_ms: 1000,
            missed_task_policy: MissedTaskPolicy::Drop,
            scoring: ScoringConfig::default(),
            geometry: Geometry::default(),
        }
    }
}

impl GameConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;

        Ok(serde_json::from_str(&text)?)
    }

    pub fn frame_seconds(&self) -> f64 {
        1.0 / self.frame_rate.max(1.0)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(mode) = &args.mode {
            self.mode = parse_game_mode(mode);
        }
        if let Some(players) = args.players {
            self.players = parse_players(players);
        }
        self.autoplay |= args.autoplay;

        if let Some(scale) = args.tempo_scale {
            self.tempo_scale = scale;
        }
        if args.default_bpm.is_some() {
            self.default_bpm = args.default_bpm;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        env_logger::try_init().unwrap_or(());

        let json = r#"{ "mode": "Practice", "scoring": { "points_perfect": 250 } }"#;
        let config: GameConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.mode, GameMode::Practice);
        assert_eq!(config.scoring.points_perfect, 250);
        assert_eq!(config.scoring.points_okay, 50);
        assert_eq!(config.geometry, Geometry::default());
        assert_eq!(config.missed_task_policy, MissedTaskPolicy::Drop);
    }

    #[test]
    fn flags_override_the_file() {
        env_logger::try_init().unwrap_or(());

        let mut config = GameConfig { mode: GameMode::Practice, tempo_scale: 2.0, ..GameConfig::default() };

        config.apply_args(&Args::parse_from(["WALKING_PIANO", "song.mid", "--players", "2"]));
        assert_eq!(config.mode, GameMode::Practice);
        assert_eq!(config.players, 2);
        assert_eq!(config.tempo_scale, 2.0);

        config.apply_args(&Args::parse_from([
            "WALKING_PIANO",
            "--mode",
            "free",
            "--players",
            "3",
            "--tempo-scale",
            "0.5",
            "--autoplay",
        ]));
        assert_eq!(config.mode, GameMode::FreePlay);
        assert_eq!(config.players, 1);
        assert_eq!(config.tempo_scale, 0.5);
        assert!(config.autoplay);
    }

    #[test]
    fn ports_are_given_by_name() {
        let args = Args::parse_from(["WALKING_PIANO", "-i", "Digital Piano", "-o", "fluid"]);
        assert_eq!(args.input.as_deref(), Some("Digital Piano"));
        assert_eq!(args.output.as_deref(), Some("fluid"));
        assert!(!args.list_ports);

        assert!(Args::parse_from(["WALKING_PIANO", "--list-ports"]).list_ports);
    }

    #[test]
    fn travel_time_follows_geometry() {
        let geometry = Geometry::default();
        assert!((geometry.travel_seconds() - 4.0).abs() < 1e-9);
    }
}
