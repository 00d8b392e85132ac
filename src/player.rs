use crate::engine::lifecycle::{NoteLifecycleEngine, RenderSnapshot};
use crate::engine::{NoteMessage, OutputPort};
use crate::model::config::{GameConfig, GameMode};
use crate::model::song::{MidiData, NoteKind, TimedEvent};
use crate::timing::tempo_map::TempoMap;
use crate::timing::timeline::TrackTimeline;
use crate::util::note_name;
use anyhow::bail;
use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum ControlMsg {
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduledEvent {
    track: usize,
    event: TimedEvent,
}

pub struct Player {
    verbose: bool,
    output: Arc<dyn OutputPort>,
    keys: Arc<Mutex<NoteLifecycleEngine>>,
    schedule: Mutex<Vec<ScheduledEvent>>,
    control_tx: Mutex<Option<Sender<ControlMsg>>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    pub fn new(output: Arc<dyn OutputPort>, config: &GameConfig, verbose: bool) -> Self {
        let keys = NoteLifecycleEngine::new(GameMode::JukeBox, config.geometry, config.scoring, false);

        Self {
            verbose,
            output,
            keys: Arc::new(Mutex::new(keys)),
            schedule: Mutex::new(Vec::new()),
            control_tx: Mutex::new(None),
            worker_handle: Mutex::new(None),
        }
    }

    pub fn load_song(&self, midi: &MidiData, config: &GameConfig) -> anyhow::Result<()> {
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

        let events: Vec<ScheduledEvent> = timeline
            .merged(midi)?
            .into_iter()
            .map(|(track, event)| ScheduledEvent { track, event })
            .collect();

        let Ok(mut schedule_lock) = self.schedule.lock() else {
            bail!("Failed to lock the schedule..!");
        };
        *schedule_lock = events;

        info!(
            "Loaded song: '{}' with {} scheduled events..!",
            midi.title.as_deref().unwrap_or("No Title"),
            schedule_lock.len()
        );

        Ok(())
    }

    pub fn snapshot(&self) -> anyhow::Result<RenderSnapshot> {
        let Ok(keys) = self.keys.lock() else {
            bail!("Failed to lock key state..!")
        };

        Ok(keys.render_snapshot())
    }

    pub fn play(&self, join: bool) -> anyhow::Result<()> {
        {
            let Ok(guard) = self.worker_handle.lock() else {
                bail!("Failed to lock worker handle..!")
            };

            if guard.as_ref().is_some_and(|h| !h.is_finished()) {
                bail!("Playback already running..!")
            }
        }

        let Ok(schedule) = self.schedule.lock() else {
            bail!("Failed to lock schedule..!")
        };

        let schedule = schedule.clone();

        if schedule.is_empty() {
            bail!("No song loaded..!")
        }

        let (tx, rx) = mpsc::channel::<ControlMsg>();

        {
            let Ok(mut ctl) = self.control_tx.lock() else {
                bail!("Failed to lock control_tx..!")
            };

            *ctl = Some(tx);
        }

        let output = Arc::clone(&self.output);
        let keys = Arc::clone(&self.keys);
        let verbose = self.verbose;
        let handle = thread::Builder::new()
            .name("jukebox".to_owned())
            .spawn(move || play_schedule(schedule, rx, output, keys, verbose))?;

        if join {
            if handle.join().is_err() {
                bail!("Playback thread panicked..!")
            }
        } else {
            let Ok(mut wh) = self.worker_handle.lock() else {
                bail!("Failed to lock worker handle..!")
            };

            *wh = Some(handle);
        }

        Ok(())
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        let tx = {
            let Ok(mut lock) = self.control_tx.lock() else {
                bail!("Failed to lock control_tx..!")
            };
            lock.take()
        };

        if let Some(tx) = tx {
            let _ = tx.send(ControlMsg::Stop);
        } else {
            bail!("No worker is running playback..!")
        }

        let Ok(mut lock) = self.worker_handle.lock() else {
            bail!("Failed to lock worker_handle..!")
        };

        if let Some(handle) = lock.take() {
            let _ = handle.join();
            debug!("Playback thread joined..!");
            info!("Stopped playback thread..!");
        }

        Ok(())
    }
}

fn silence(output: &dyn OutputPort, keys: &Mutex<NoteLifecycleEngine>) {
    if let Err(why) = output.reset() {
        warn!("Failed to silence the output | why: {:?}", why);
    }

    if let Ok(mut keys) = keys.lock() {
        keys.reset();
    }
}

fn play_schedule(
    schedule: Vec<ScheduledEvent>,
    ctrl_rx: Receiver<ControlMsg>,
    output: Arc<dyn OutputPort>,
    keys: Arc<Mutex<NoteLifecycleEngine>>,
    verbose: bool,
) {
    const MAX_SLEEP_CHUNK_S: f64 = 0.050;

    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let start = Instant::now();

    for scheduled in schedule.into_iter() {
        let event = scheduled.event;
        let Ok(offset) = Duration::try_from_secs_f64(event.at_seconds.max(0.0)) else {
            silence(output.as_ref(), &keys);
            warn!("Event at {}s cannot be waited for, stopping playback..!", event.at_seconds);
            return;
        };
        let target = start + offset;

        loop {
            if ctrl_rx.try_recv().is_ok() {
                silence(output.as_ref(), &keys);
                warn!(
                    "Playback stopped via control message after {} seconds..!",
                    start.elapsed().as_secs()
                );
                return;
            }

            let now = Instant::now();
            if now >= target {
                break;
            }
            let remaining = (target - now).as_secs_f64();

            sleeper.sleep(Duration::from_secs_f64(remaining.min(MAX_SLEEP_CHUNK_S)));
        }

        if verbose {
            let label = format!(
                "{:?} {} ({}) on track {}",
                event.kind,
                note_name(event.note),
                event.note,
                scheduled.track
            );
            info!(
                "{:30} | at {:>10.3}s | scheduled for: {:>10.3}s",
                label,
                start.elapsed().as_secs_f64(),
                event.at_seconds
            );
        }

        let message = match event.kind {
            NoteKind::On => NoteMessage::NoteOn { note: event.note, velocity: event.velocity },
            NoteKind::Off => NoteMessage::NoteOff { note: event.note, velocity: event.velocity },
        };
        output.send_best_effort(message);

        if let Ok(mut keys) = keys.lock() {
            match event.kind {
                NoteKind::On => keys.press_key(event.note),
                NoteKind::Off => keys.release_key(event.note),
            };
        }
    }

    info!("Playback thread finished all events..!");
}
