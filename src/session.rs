use crate::engine::clock::Clock;
use crate::engine::lifecycle::{NoteLifecycleEngine, RenderSnapshot};
use crate::engine::scheduler::{Command, PausableScheduler};
use crate::engine::{InputPort, NoteMessage, OutputPort};
use crate::error::{GameError, GameResult};
use crate::model::config::{GameConfig, GameMode};
use crate::model::song::{MidiData, NoteKind, TimedEvent};
use crate::timing::tempo_map::TempoMap;
use crate::timing::timeline::TrackTimeline;
use anyhow::bail;
use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Stand-in for a zero delay so that no two tasks share a deadline.
pub const MIN_TASK_DELAY_S: f64 = 0.000_001;

#[derive(Debug, Clone)]
pub struct PlayerTrack {
    pub player: u8,
    pub track: usize,
    pub events: Vec<TimedEvent>,
}

/// Build the tempo map from the conductor track and pick the tracks to play.
///
/// One player takes track 0, or track 1 when 0 holds no notes. Two players need both.
pub fn load_player_tracks(midi: &MidiData, config: &GameConfig) -> GameResult<Vec<PlayerTrack>> {
    let conductor = midi
        .tracks
        .first()
        .map(|t| t.events.as_slice())
        .unwrap_or_default();

    let tempo_map = TempoMap::build_with_default(
        conductor,
        midi.ticks_per_beat,
        config.tempo_scale,
        config.default_bpm,
    )?;
    let timeline = TrackTimeline::new(&tempo_map, midi.ticks_per_beat)?;

    if config.players == 2 {
        return match (timeline.extract_track(midi, 0), timeline.extract_track(midi, 1)) {
            (Ok(first), Ok(second)) => Ok(vec![
                PlayerTrack { player: 1, track: 0, events: first },
                PlayerTrack { player: 2, track: 1, events: second },
            ]),
            _ => Err(GameError::UnsuitableForPlayerCount { players: 2 }),
        };
    }

    match timeline.extract_track(midi, 0) {
        Ok(events) => Ok(vec![PlayerTrack { player: 1, track: 0, events }]),
        Err(GameError::TrackUnavailable { .. }) => {
            debug!("Track 0 is unavailable, falling back to track 1..!");
            let events = timeline.extract_track(midi, 1)?;
            Ok(vec![PlayerTrack { player: 1, track: 1, events }])
        }
        Err(why) => Err(why),
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameReport {
    pub fired: Vec<Command>,
    pub cleared: Vec<u8>,
    pub paused: bool,
}

pub struct SessionState {
    config: GameConfig,
    scheduler: PausableScheduler,
    engine: Mutex<NoteLifecycleEngine>,
    output: Arc<dyn OutputPort>,
    active: AtomicBool,
    last_frame: Mutex<f64>,
}

impl SessionState {
    pub fn new(config: GameConfig, clock: Arc<dyn Clock>, output: Arc<dyn OutputPort>) -> Self {
        let engine = NoteLifecycleEngine::new(
            config.mode,
            config.geometry,
            config.scoring,
            config.autoplay,
        );

        Self {
            scheduler: PausableScheduler::new(clock, config.missed_task_policy),
            engine: Mutex::new(engine),
            output,
            active: AtomicBool::new(true),
            last_frame: Mutex::new(0.0),
            config,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &PausableScheduler {
        &self.scheduler
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut NoteLifecycleEngine) -> T) -> anyhow::Result<T> {
        let Ok(mut engine) = self.engine.lock() else {
            bail!("Failed to lock the note engine..!")
        };

        Ok(f(&mut engine))
    }

    /// Queue every note of a track, plus its end-of-song marker. Returns when the last
    /// note is due, in seconds from now.
    ///
    /// Zero delays are bumped to [`MIN_TASK_DELAY_S`] before being summed, so events on
    /// the same tick still get distinct, increasing deadlines.
    pub fn schedule_track(&self, track: &PlayerTrack) -> anyhow::Result<f64> {
        let mut total = 0.0;

        for event in &track.events {
            total += event.delay_seconds.max(MIN_TASK_DELAY_S);

            let command = match event.kind {
                NoteKind::On => Command::note_on(event.note, event.velocity, track.player),
                NoteKind::Off => Command::note_off(event.note, event.velocity, track.player),
            };
            self.scheduler.schedule(command, total)?;
        }

        self.scheduler.schedule(
            Command::end_of_song(track.player),
            total + self.config.end_of_song_buffer_seconds,
        )?;

        debug!(
            "Scheduled {} events for player {} over {:.3}s..!",
            track.events.len(),
            track.player,
            total
        );

        Ok(total)
    }

    /// One tick of the frame driver: fire what is due, then move the notes.
    ///
    /// The time step is measured on the scheduler's virtual clock, so nothing moves
    /// while paused and no jump happens on resume.
    pub fn run_frame(&self) -> anyhow::Result<FrameReport> {
        let fired = self.scheduler.take_due()?;
        let now = self.scheduler.virtual_elapsed()?;

        let dt = {
            let Ok(mut last) = self.last_frame.lock() else {
                bail!("Failed to lock the frame clock..!")
            };
            let dt = (now - *last).max(0.0);
            *last = now;
            dt
        };

        let Ok(mut engine) = self.engine.lock() else {
            bail!("Failed to lock the note engine..!")
        };

        for command in &fired {
            engine.dispatch(command);
        }

        let mut report = FrameReport {
            fired,
            cleared: Vec::new(),
            paused: self.scheduler.is_paused()?,
        };

        if report.paused {
            return Ok(report);
        }

        let outcome = engine.advance(dt);
        engine.score_tick(dt);

        // engine before scheduler, the same order handle_input takes them in
        if outcome.pause_for.is_some() {
            report.paused = self.scheduler.pause()?;
        }
        drop(engine);

        for message in outcome.outgoing {
            self.output.send_best_effort(message);
        }
        report.cleared = outcome.cleared;

        Ok(report)
    }

    pub fn handle_input(&self, message: NoteMessage) -> anyhow::Result<()> {
        let note = message.note();

        let resumed = {
            let Ok(mut engine) = self.engine.lock() else {
                bail!("Failed to lock the note engine..!")
            };

            if message.is_press() {
                engine.press_key(note);

                if engine.pause_note() == Some(note) && self.scheduler.is_paused()? {
                    engine.take_pause_note();
                    self.scheduler.resume()?
                } else {
                    false
                }
            } else {
                engine.release_key(note);
                false
            }
        };

        self.output.send_best_effort(message);

        if resumed {
            info!("Resumed after note {} was played..!", note);
        }

        Ok(())
    }

    /// The key a Practice pause is waiting for.
    pub fn awaited_note(&self) -> anyhow::Result<Option<u8>> {
        self.with_engine(|engine| engine.pause_note())
    }

    pub fn snapshot(&self) -> anyhow::Result<RenderSnapshot> {
        let mut snapshot = self.with_engine(|engine| engine.render_snapshot())?;
        snapshot.paused = self.scheduler.is_paused()?;
        Ok(snapshot)
    }

    pub fn score(&self) -> u64 {
        self.with_engine(|engine| engine.score()).unwrap_or(0)
    }

    pub fn is_game_over(&self) -> bool {
        self.with_engine(|engine| engine.is_game_over()).unwrap_or(false)
    }

    pub fn wait(&self) {
        while self.is_active() && !self.is_game_over() {
            spin_sleep::sleep(Duration::from_millis(50));
        }
    }

    fn expect_players(&self, players: u8) -> anyhow::Result<()> {
        self.with_engine(|engine| engine.expect_endings(players))
    }

    fn shut_down(&self) -> anyhow::Result<()> {
        self.active.store(false, Ordering::SeqCst);
        self.scheduler.clear()?;

        if let Err(why) = self.output.reset() {
            warn!("Failed to reset the output port | why: {:?}", why);
        }

        self.with_engine(|engine| engine.reset())?;

        if let Ok(mut last) = self.last_frame.lock() {
            *last = 0.0;
        }

        Ok(())
    }
}

struct Worker {
    name: String,
    handle: JoinHandle<()>,
    done_rx: Receiver<()>,
}

/// Dropping a session tears it down.
pub struct Session {
    state: Arc<SessionState>,
    workers: Vec<Worker>,
    torn_down: bool,
    final_score: u64,
}

impl Session {
    /// Loading errors surface before any thread is spawned.
    pub fn start(
        config: GameConfig,
        midi: Option<&MidiData>,
        input: Option<Box<dyn InputPort>>,
        output: Arc<dyn OutputPort>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        if config.mode == GameMode::JukeBox {
            bail!("JukeBox mode plays through the JukeBox player, not a game session..!");
        }

        let tracks = if config.mode.has_falling_notes() {
            let Some(midi) = midi else {
                bail!("{:?} mode needs a MIDI file..!", config.mode)
            };
            load_player_tracks(midi, &config)?
        } else {
            Vec::new()
        };

        let state = Arc::new(SessionState::new(config, clock, output));
        let mut session = Session {
            state: Arc::clone(&state),
            workers: Vec::new(),
            torn_down: false,
            final_score: 0,
        };

        if let Some(input) = input {
            let state = Arc::clone(&state);
            session.spawn_worker("input", move || listen_for_input(state, input))?;
        } else if state.config.mode == GameMode::FreePlay {
            warn!("FreePlay without an input port has nothing to do..!");
        }

        if state.config.mode.has_falling_notes() {
            state.expect_players(tracks.len() as u8)?;

            let frame_state = Arc::clone(&state);
            session.spawn_worker("frames", move || drive_frames(frame_state))?;

            for track in tracks {
                let state = Arc::clone(&state);
                let name = format!("playback-{}", track.player);
                session.spawn_worker(&name, move || {
                    if let Err(why) = state.schedule_track(&track) {
                        warn!("Failed to schedule track {} | why: {:?}", track.track, why);
                    }
                })?;
            }
        }

        info!(
            "Started a {:?} session with {} worker(s)..!",
            state.config.mode,
            session.workers.len()
        );

        Ok(session)
    }

    fn spawn_worker<F>(&mut self, name: &str, work: F) -> anyhow::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                work();
                let _ = done_tx.send(());
            })?;

        self.workers.push(Worker {
            name: name.to_owned(),
            handle,
            done_rx,
        });

        Ok(())
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Signal every worker to stop, join each within the configured timeout, then clear
    /// the scheduler and release the output. Safe to call more than once.
    pub fn teardown(&mut self) -> anyhow::Result<u64> {
        if self.torn_down {
            return Ok(self.final_score);
        }
        self.torn_down = true;

        let score = self.state.score();
        self.final_score = score;
        self.state.active.store(false, Ordering::SeqCst);

        let timeout = Duration::from_millis(self.state.config.join_timeout_ms);
        for worker in self.workers.drain(..) {
            match worker.done_rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        warn!("Worker '{}' panicked..!", worker.name);
                    } else {
                        debug!("Worker '{}' joined..!", worker.name);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Worker '{}' did not stop within {:?}, leaving it behind..!",
                        worker.name, timeout
                    );
                }
            }
        }

        self.state.shut_down()?;
        info!("Game exited cleanly with a score of {}..!", score);

        Ok(score)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(why) = self.teardown() {
            warn!("Session teardown failed | why: {:?}", why);
        }
    }
}

fn listen_for_input(state: Arc<SessionState>, mut input: Box<dyn InputPort>) {
    let poll_interval = Duration::from_micros(state.config.input_poll_micros);
    let mut failing = false;

    info!("Listening for keyboard input..!");

    while state.is_active() {
        match input.poll() {
            Ok(Some(message)) => {
                failing = false;
                if let Err(why) = state.handle_input(message) {
                    warn!("Failed to handle {:?} | why: {:?}", message, why);
                }
            }
            Ok(None) => {}
            Err(why) => {
                if !failing {
                    warn!("MIDI input failed, continuing without it | why: {:?}", why);
                }
                failing = true;
            }
        }

        spin_sleep::sleep(poll_interval);
    }

    debug!("Input thread ended..!");
}

fn drive_frames(state: Arc<SessionState>) {
    let frame = Duration::from_secs_f64(state.config.frame_seconds());
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

    while state.is_active() {
        if let Err(why) = state.run_frame() {
            warn!("Frame failed | why: {:?}", why);
        }

        sleeper.sleep(frame);
    }

    debug!("Frame driver ended..!");
}
