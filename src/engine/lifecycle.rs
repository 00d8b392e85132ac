//! Falling notes, key highlighting and scoring.
//!
//! A note spawns at the spawn line when its NoteOn fires, stretches upwards while it is
//! held, and slides down at a fixed speed. Its leading edge passes an outer (okay) and an
//! inner (perfect) band around the hit line. The matching NoteOff locks its length. Once
//! the trailing edge has also reached the hit line the note is cleared and its key's
//! timing state goes back to neutral, ready for the next note on that key.

use crate::engine::NoteMessage;
use crate::engine::scheduler::{Command, CommandKind};
use crate::model::config::{GameMode, Geometry, ScoringConfig};
use crate::util::{in_key_range, is_black_key};
use log::{debug, info};

pub const LOWEST_KEY: u8 = 21;
pub const HIGHEST_KEY: u8 = 108;
pub const KEY_COUNT: usize = (HIGHEST_KEY - LOWEST_KEY + 1) as usize;

pub type Rgb = (u8, u8, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingState {
    #[default]
    NotYet,
    Okay,
    Perfect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Highlight {
    #[default]
    Off,
    Okay,
    Perfect,
    Wrong,
}

impl Highlight {
    pub fn color(self, black_key: bool) -> Rgb {
        match (self, black_key) {
            (Highlight::Off, false) => (255, 255, 255),
            (Highlight::Off, true) => (0, 0, 0),
            (Highlight::Okay, false) => (255, 255, 0),
            (Highlight::Okay, true) => (100, 100, 0),
            (Highlight::Perfect, false) => (0, 255, 0),
            (Highlight::Perfect, true) => (0, 100, 0),
            (Highlight::Wrong, false) => (255, 0, 0),
            (Highlight::Wrong, true) => (100, 0, 0),
        }
    }

    fn is_hit(self) -> bool {
        matches!(self, Highlight::Okay | Highlight::Perfect)
    }
}

fn player_color(player: u8, black_key: bool) -> Rgb {
    match (player, black_key) {
        (2, false) => (255, 130, 67),
        (2, true) => (150, 80, 33),
        (_, false) => (137, 207, 240),
        (_, true) => (70, 130, 255),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyState {
    pub timing: TimingState,
    /// The one-time okay/perfect bonus has been handed out for the current note.
    pub note_played: bool,
    pub playing: bool,
    pub highlight: Highlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotePhase {
    Falling,
    InHitWindow(TimingState),
    Resolved,
}

#[derive(Debug, Clone)]
pub struct FallingNote {
    pub id: u64,
    pub note: u8,
    pub player: u8,
    pub spawn_time: f64,
    /// Bottom edge of the note.
    pub y: f64,
    pub height: f64,
    pub locked: bool,
    /// The bottom edge has reached the hit line.
    pub played: bool,
    pub timing: TimingState,
    sunk: f64,
    autoplay_released: bool,
}

impl FallingNote {
    pub fn phase(&self) -> NotePhase {
        if self.locked {
            NotePhase::Resolved
        } else if self.timing != TimingState::NotYet {
            NotePhase::InHitWindow(self.timing)
        } else {
            NotePhase::Falling
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameOutcome {
    pub outgoing: Vec<NoteMessage>,
    /// Practice mode wants the clock paused until this key is pressed.
    pub pause_for: Option<u8>,
    pub cleared: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteView {
    pub note: u8,
    pub player: u8,
    pub y: f64,
    pub height: f64,
    pub color: Rgb,
    pub timing: TimingState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub hit_line_y: f64,
    pub spawn_y: f64,
    pub notes: Vec<NoteView>,
    pub keys: Vec<(u8, Rgb)>,
    pub score: u64,
    pub paused: bool,
    pub game_over: bool,
}

#[derive(Debug)]
pub struct NoteLifecycleEngine {
    mode: GameMode,
    geometry: Geometry,
    scoring: ScoringConfig,
    autoplay: bool,
    notes: Vec<FallingNote>,
    keys: [KeyState; KEY_COUNT],
    next_id: u64,
    clock: f64,
    score: u64,
    score_tick_accum: f64,
    pending_presses: Vec<u8>,
    pause_note: Option<u8>,
    endings_expected: u8,
    endings_seen: u8,
    game_over: bool,
}

impl NoteLifecycleEngine {
    pub fn new(mode: GameMode, geometry: Geometry, scoring: ScoringConfig, autoplay: bool) -> Self {
        Self {
            mode,
            geometry,
            scoring,
            autoplay,
            notes: Vec::new(),
            keys: [KeyState::default(); KEY_COUNT],
            next_id: 0,
            clock: 0.0,
            score: 0,
            score_tick_accum: 0.0,
            pending_presses: Vec::new(),
            pause_note: None,
            endings_expected: 1,
            endings_seen: 0,
            game_over: false,
        }
    }

    fn key(&self, note: u8) -> Option<&KeyState> {
        in_key_range(note).then(|| &self.keys[(note - LOWEST_KEY) as usize])
    }

    fn key_mut(&mut self, note: u8) -> Option<&mut KeyState> {
        in_key_range(note).then(|| &mut self.keys[(note - LOWEST_KEY) as usize])
    }

    pub fn key_state(&self, note: u8) -> Option<KeyState> {
        self.key(note).copied()
    }

    pub fn notes(&self) -> &[FallingNote] {
        &self.notes
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn pause_note(&self) -> Option<u8> {
        self.pause_note
    }

    pub fn take_pause_note(&mut self) -> Option<u8> {
        self.pause_note.take()
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// How many end-of-song markers must fire before the game is over, one per player.
    pub fn expect_endings(&mut self, players: u8) {
        self.endings_expected = players.max(1);
        self.endings_seen = 0;
    }

    pub fn dispatch(&mut self, command: &Command) {
        match command.kind {
            CommandKind::NoteOn => {
                self.spawn(command.note, command.player);
                self.flag_note(command.note, true);
            }
            CommandKind::NoteOff => self.flag_note(command.note, false),
            CommandKind::EndOfSong => {
                self.endings_seen += 1;
                debug!("Player {} reached the end of their track..!", command.player);

                if self.endings_seen >= self.endings_expected {
                    info!("End of song reached with a score of {}..!", self.score);
                    self.game_over = true;
                }
            }
        }
    }

    /// Put a new note at the spawn line. Notes off the keyboard are ignored.
    pub fn spawn(&mut self, note: u8, player: u8) -> Option<u64> {
        if !in_key_range(note) {
            debug!("Ignoring note {} outside the keyboard..!", note);
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        self.notes.push(FallingNote {
            id,
            note,
            player,
            spawn_time: self.clock,
            y: self.geometry.spawn_y,
            height: 0.0,
            locked: false,
            played: false,
            timing: TimingState::NotYet,
            sunk: 0.0,
            autoplay_released: false,
        });

        Some(id)
    }

    /// A release locks the most recently spawned note of that number that is still
    /// unlocked, so a quick retrigger pairs the off with the newest on.
    pub fn flag_note(&mut self, note: u8, on: bool) {
        if on {
            return;
        }

        match self.notes.iter_mut().rev().find(|n| n.note == note && !n.locked) {
            Some(falling) => falling.locked = true,
            None => debug!("NoteOff for {} with no open falling note..!", note),
        }
    }

    /// Returns false for notes outside the keyboard.
    pub fn press_key(&mut self, note: u8) -> bool {
        let mode = self.mode;
        let scoring = self.scoring;
        let Some(key) = self.key_mut(note) else {
            return false;
        };

        key.playing = true;
        let mut award = 0;

        key.highlight = if matches!(mode, GameMode::FreePlay | GameMode::JukeBox) {
            Highlight::Perfect
        } else {
            match key.timing {
                TimingState::Okay => {
                    if !key.note_played {
                        key.note_played = true;
                        award = scoring.points_okay;
                    }
                    Highlight::Okay
                }
                TimingState::Perfect => {
                    if !key.note_played {
                        key.note_played = true;
                        award = scoring.points_perfect;
                    }
                    Highlight::Perfect
                }
                TimingState::NotYet => Highlight::Wrong,
            }
        };

        if mode == GameMode::Challenge {
            self.score += award;
        }

        true
    }

    pub fn release_key(&mut self, note: u8) -> bool {
        let Some(key) = self.key_mut(note) else {
            return false;
        };

        key.playing = false;
        key.highlight = Highlight::Off;

        true
    }

    pub fn advance(&mut self, dt: f64) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        let geometry = self.geometry;
        let step = geometry.fall_speed * dt;
        let hit = geometry.hit_line_y;
        let mut notes = std::mem::take(&mut self.notes);

        self.clock += dt;

        notes.retain_mut(|falling| {
            let idx = (falling.note - LOWEST_KEY) as usize;

            if !falling.locked {
                falling.height += step;
            }
            if falling.y >= hit {
                falling.y -= step;
            }

            let key = &mut self.keys[idx];
            let band = if falling.y <= hit + geometry.okay_band && falling.y > hit + geometry.perfect_band {
                Some(TimingState::Okay)
            } else if falling.y <= hit + geometry.perfect_band && falling.y >= hit - geometry.perfect_band {
                Some(TimingState::Perfect)
            } else {
                None
            };

            match band {
                Some(TimingState::Okay) => {
                    if key.timing != TimingState::Perfect {
                        key.timing = TimingState::Okay;
                    }
                    if falling.timing != TimingState::Perfect {
                        falling.timing = TimingState::Okay;
                    }
                }
                Some(TimingState::Perfect) => {
                    key.timing = TimingState::Perfect;
                    falling.timing = TimingState::Perfect;
                }
                _ => {}
            }

            if falling.y > hit {
                return true;
            }

            let sink = hit - falling.y;
            falling.height -= sink;
            falling.sunk += sink;
            falling.y = hit;

            if !falling.played {
                falling.played = true;
                falling.height = falling.height.max(0.0);

                if self.autoplay && !key.playing {
                    key.playing = true;
                    outcome.outgoing.push(NoteMessage::NoteOn { note: falling.note, velocity: 64 });
                    self.pending_presses.push(falling.note);
                } else if self.mode == GameMode::Practice && !key.highlight.is_hit() {
                    info!("Missed note {}, waiting for it to be played..!", falling.note);
                    outcome.pause_for = Some(falling.note);
                }

                return true;
            }

            if falling.height > 0.0 && falling.sunk > geometry.perfect_band {
                key.timing = TimingState::Okay;
                falling.timing = TimingState::Okay;
            }

            if falling.height > 0.0 {
                return true;
            }

            key.timing = TimingState::NotYet;
            key.note_played = false;

            if self.autoplay && key.playing && !falling.autoplay_released {
                falling.autoplay_released = true;
                outcome.outgoing.push(NoteMessage::NoteOff { note: falling.note, velocity: 0 });
                key.playing = false;
                key.highlight = Highlight::Off;
            }

            outcome.cleared.push(falling.note);
            false
        });

        self.notes = notes;

        for note in std::mem::take(&mut self.pending_presses) {
            self.press_key(note);
        }

        if let Some(note) = outcome.pause_for {
            self.pause_note = Some(note);
        }

        outcome
    }

    /// Periodic hold bonus. Only Challenge mode keeps score.
    pub fn score_tick(&mut self, dt: f64) {
        if self.mode != GameMode::Challenge || self.scoring.score_tick_seconds <= 0.0 {
            return;
        }

        self.score_tick_accum += dt;
        while self.score_tick_accum >= self.scoring.score_tick_seconds {
            self.score_tick_accum -= self.scoring.score_tick_seconds;

            for note in LOWEST_KEY..=HIGHEST_KEY {
                let Some(key) = self.key(note).copied() else {
                    continue;
                };

                if !key.playing {
                    continue;
                }

                match key.timing {
                    TimingState::NotYet => {
                        self.press_key(note);
                    }
                    TimingState::Okay | TimingState::Perfect => self.score += self.scoring.points_hold,
                }
            }
        }
    }

    pub fn render_snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            hit_line_y: self.geometry.hit_line_y,
            spawn_y: self.geometry.spawn_y,
            notes: self
                .notes
                .iter()
                .map(|n| NoteView {
                    note: n.note,
                    player: n.player,
                    y: n.y,
                    height: n.height,
                    color: player_color(n.player, is_black_key(n.note)),
                    timing: n.timing,
                })
                .collect(),
            keys: (LOWEST_KEY..=HIGHEST_KEY)
                .filter_map(|note| {
                    let key = self.key(note)?;
                    (key.highlight != Highlight::Off)
                        .then(|| (note, key.highlight.color(is_black_key(note))))
                })
                .collect(),
            score: self.score,
            paused: self.pause_note.is_some(),
            game_over: self.game_over,
        }
    }

    pub fn reset(&mut self) {
        self.notes.clear();
        self.keys = [KeyState::default(); KEY_COUNT];
        self.pending_presses.clear();
        self.clock = 0.0;
        self.score = 0;
        self.score_tick_accum = 0.0;
        self.pause_note = None;
        self.endings_seen = 0;
        self.game_over = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn short_drop() -> Geometry {
        Geometry {
            hit_line_y: 245.0,
            spawn_y: 305.0,
            fall_speed: 150.0,
            okay_band: 70.0,
            perfect_band: 20.0,
        }
    }

    fn engine(mode: GameMode, geometry: Geometry, autoplay: bool) -> NoteLifecycleEngine {
        env_logger::try_init().unwrap_or(());
        NoteLifecycleEngine::new(mode, geometry, ScoringConfig::default(), autoplay)
    }

    fn run(engine: &mut NoteLifecycleEngine, frames: usize, dt: f64) -> Vec<FrameOutcome> {
        (0..frames).map(|_| engine.advance(dt)).collect()
    }

    #[test]
    fn release_locks_newest_open_note() {
        let mut engine = engine(GameMode::Challenge, Geometry::default(), false);
        let ids: Vec<u64> = (0..3).filter_map(|_| engine.spawn(60, 1)).collect();
        engine.spawn(61, 1);

        engine.flag_note(60, false);
        let locked: Vec<u64> = engine.notes().iter().filter(|n| n.locked).map(|n| n.id).collect();
        assert_eq!(locked, vec![ids[2]]);

        engine.flag_note(60, false);
        let locked: Vec<u64> = engine.notes().iter().filter(|n| n.locked).map(|n| n.id).collect();
        assert_eq!(locked, vec![ids[1], ids[2]]);

        // nothing open for this number, nothing happens
        engine.flag_note(72, false);
        assert_eq!(engine.notes().iter().filter(|n| n.locked).count(), 2);
    }

    #[test]
    fn notes_off_the_keyboard_are_ignored() {
        let mut engine = engine(GameMode::Challenge, Geometry::default(), false);

        assert_eq!(engine.spawn(20, 1), None);
        assert_eq!(engine.spawn(109, 1), None);
        assert!(!engine.press_key(5));
        assert!(!engine.release_key(127));
        assert!(engine.key_state(109).is_none());

        engine.dispatch(&Command::note_on(0, 100, 1));
        engine.dispatch(&Command::note_off(0, 0, 1));
        assert!(engine.notes().is_empty());
        assert!(run(&mut engine, 10, 0.1).iter().all(|o| o.cleared.is_empty()));
    }

    #[test]
    fn note_walks_through_its_lifecycle() {
        let mut engine = engine(GameMode::Challenge, Geometry::default(), false);
        engine.dispatch(&Command::note_on(60, 100, 1));
        assert_eq!(engine.notes()[0].phase(), NotePhase::Falling);

        run(&mut engine, 360, 0.01);
        assert_eq!(engine.notes()[0].phase(), NotePhase::InHitWindow(TimingState::Okay));

        run(&mut engine, 30, 0.01);
        assert_eq!(engine.notes()[0].phase(), NotePhase::InHitWindow(TimingState::Perfect));

        assert!(engine.press_key(60));
        assert_eq!(engine.score(), 100);
        assert!(engine.press_key(60));
        assert_eq!(engine.score(), 100);

        run(&mut engine, 60, 0.01);
        assert!(engine.notes()[0].played);
        engine.dispatch(&Command::note_off(60, 0, 1));
        assert_eq!(engine.notes()[0].phase(), NotePhase::Resolved);

        let mut frames = 0;
        while !engine.notes().is_empty() {
            let key = engine.key_state(60).unwrap();
            assert!(key.note_played);
            assert_ne!(key.timing, TimingState::NotYet);

            engine.advance(0.01);
            frames += 1;
            assert!(frames < 1000);
        }

        let key = engine.key_state(60).unwrap();
        assert!(!key.note_played);
        assert_eq!(key.timing, TimingState::NotYet);
    }

    #[test]
    fn next_note_on_the_same_key_scores_again() {
        let mut engine = engine(GameMode::Challenge, short_drop(), false);

        engine.spawn(64, 1);
        run(&mut engine, 3, 0.1);
        engine.press_key(64);
        engine.flag_note(64, false);
        let cleared: usize = run(&mut engine, 10, 0.1).iter().map(|o| o.cleared.len()).sum();
        assert_eq!(cleared, 1);
        engine.release_key(64);

        engine.spawn(64, 2);
        run(&mut engine, 3, 0.1);
        engine.press_key(64);
        assert_eq!(engine.score(), 200);
    }

    #[test]
    fn held_keys_earn_hold_points_in_challenge_only() {
        let mut challenge = engine(GameMode::Challenge, short_drop(), false);
        challenge.spawn(60, 1);
        run(&mut challenge, 3, 0.1);
        challenge.press_key(60);
        assert_eq!(challenge.score(), 100);

        challenge.score_tick(0.5);
        assert_eq!(challenge.score(), 120);

        challenge.release_key(60);
        challenge.score_tick(0.5);
        assert_eq!(challenge.score(), 120);

        let mut practice = engine(GameMode::Practice, short_drop(), false);
        practice.spawn(60, 1);
        run(&mut practice, 3, 0.1);
        practice.press_key(60);
        practice.score_tick(1.0);
        assert_eq!(practice.score(), 0);
    }

    #[test]
    fn early_press_is_wrong() {
        let mut engine = engine(GameMode::Challenge, Geometry::default(), false);
        engine.spawn(60, 1);
        engine.press_key(60);

        assert_eq!(engine.key_state(60).unwrap().highlight, Highlight::Wrong);
        assert_eq!(engine.score(), 0);

        let mut free = self::engine(GameMode::FreePlay, Geometry::default(), false);
        free.press_key(60);
        assert_eq!(free.key_state(60).unwrap().highlight, Highlight::Perfect);
        assert_eq!(free.score(), 0);
    }

    #[test]
    fn practice_pauses_on_a_missed_note() {
        let mut missed = engine(GameMode::Practice, short_drop(), false);
        missed.spawn(60, 1);
        let outcomes = run(&mut missed, 4, 0.1);

        assert_eq!(outcomes[3].pause_for, Some(60));
        assert_eq!(missed.take_pause_note(), Some(60));
        assert_eq!(missed.pause_note(), None);

        let mut hit = engine(GameMode::Practice, short_drop(), false);
        hit.spawn(60, 1);
        run(&mut hit, 3, 0.1);
        hit.press_key(60);
        assert!(run(&mut hit, 1, 0.1)[0].pause_for.is_none());
    }

    #[test]
    fn autoplay_presses_and_releases_keys() {
        let mut engine = engine(GameMode::Challenge, short_drop(), true);
        engine.spawn(60, 1);

        let outcomes = run(&mut engine, 4, 0.1);
        assert_eq!(outcomes[3].outgoing, vec![NoteMessage::NoteOn { note: 60, velocity: 64 }]);
        assert_eq!(engine.key_state(60).unwrap().highlight, Highlight::Perfect);
        assert_eq!(engine.score(), 100);

        engine.flag_note(60, false);
        let outgoing: Vec<NoteMessage> = run(&mut engine, 10, 0.1)
            .into_iter()
            .flat_map(|o| o.outgoing)
            .collect();
        assert_eq!(outgoing, vec![NoteMessage::NoteOff { note: 60, velocity: 0 }]);
        assert!(!engine.key_state(60).unwrap().playing);
        assert!(engine.notes().is_empty());
    }

    #[test]
    fn snapshot_and_end_of_song() {
        let mut engine = engine(GameMode::Challenge, Geometry::default(), false);
        engine.dispatch(&Command::note_on(60, 100, 1));
        engine.dispatch(&Command::note_on(61, 100, 2));
        engine.press_key(40);
        engine.advance(0.5);

        let snapshot = engine.render_snapshot();
        assert_eq!(snapshot.notes.len(), 2);
        assert_eq!(snapshot.notes[0].color, (137, 207, 240));
        assert_eq!(snapshot.notes[1].color, (150, 80, 33));
        assert!((snapshot.notes[0].y - 770.0).abs() < 1e-9);
        assert!((snapshot.notes[0].height - 75.0).abs() < 1e-9);
        assert_eq!(snapshot.keys, vec![(40, (255, 0, 0))]);
        assert!(!snapshot.game_over);

        engine.dispatch(&Command::end_of_song(1));
        assert!(engine.is_game_over());

        engine.reset();
        assert!(engine.notes().is_empty());
        assert!(!engine.is_game_over());
        assert!(engine.render_snapshot().keys.is_empty());
    }
}
