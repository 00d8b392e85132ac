use crate::GameMode;
use log::info;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#/Db", "D", "D#/Eb", "E", "F", "F#/Gb", "G", "G#/Ab", "A", "A#/Bb", "B",
];

pub fn parse_game_mode(input: &str) -> GameMode {
    match input.to_lowercase().as_str() {
        "c" | "challenge" => GameMode::Challenge,
        "p" | "practice" => GameMode::Practice,
        "f" | "free" | "freeplay" => GameMode::FreePlay,
        "j" | "jukebox" => GameMode::JukeBox,
        other => {
            info!("Unknown game mode '{}', defaulting to `challenge`..!", other);
            GameMode::Challenge
        }
    }
}

pub fn parse_players(players: u8) -> u8 {
    match players {
        1 | 2 => players,
        other => {
            info!("{} players are not supported, defaulting to 1..!", other);
            1
        }
    }
}

/// True for the 88 keys of a piano, A0 (21) through C8 (108).
pub fn in_key_range(note: u8) -> bool {
    (21..=108).contains(&note)
}

pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}

pub fn note_name(note: u8) -> &'static str {
    NOTE_NAMES[(note % 12) as usize]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn black_keys_and_names() {
        assert!(!is_black_key(21));
        assert!(is_black_key(22));
        assert!(!is_black_key(60));
        assert!(is_black_key(61));
        assert!(is_black_key(106));
        assert!(!is_black_key(108));

        assert_eq!(note_name(21), "A");
        assert_eq!(note_name(60), "C");
        assert_eq!(note_name(66), "F#/Gb");
    }

    #[test]
    fn keyboard_bounds() {
        assert!(!in_key_range(20));
        assert!(in_key_range(21));
        assert!(in_key_range(108));
        assert!(!in_key_range(109));
    }

    #[test]
    fn argument_parsing_falls_back() {
        env_logger::try_init().unwrap_or(());

        assert_eq!(parse_game_mode("Practice"), GameMode::Practice);
        assert_eq!(parse_game_mode("j"), GameMode::JukeBox);
        assert_eq!(parse_game_mode("karaoke"), GameMode::Challenge);
        assert_eq!(parse_players(2), 2);
        assert_eq!(parse_players(4), 1);
    }
}
