use crate::engine::clock::Clock;
use crate::model::config::MissedTaskPolicy;
use anyhow::bail;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEADLINE_SLACK_S: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    NoteOn,
    NoteOff,
    EndOfSong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub note: u8,
    pub velocity: u8,
    pub player: u8,
}

impl Command {
    pub fn note_on(note: u8, velocity: u8, player: u8) -> Self {
        Self { kind: CommandKind::NoteOn, note, velocity, player }
    }

    pub fn note_off(note: u8, velocity: u8, player: u8) -> Self {
        Self { kind: CommandKind::NoteOff, note, velocity, player }
    }

    pub fn end_of_song(player: u8) -> Self {
        Self { kind: CommandKind::EndOfSong, note: 0, velocity: 0, player }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduledTask {
    pub id: TaskHandle,
    pub command: Command,
    /// Seconds after the current start time at which the task was handed in.
    pub registered_at: f64,
    pub delay_seconds: f64,
}

impl ScheduledTask {
    fn deadline(&self) -> f64 {
        self.registered_at + self.delay_seconds
    }
}

#[derive(Debug)]
struct Inner {
    start_time: Duration,
    paused_at: Option<Duration>,
    virtual_base: f64,
    tasks: Vec<ScheduledTask>,
    next_id: u64,
    dropped_on_resume: usize,
}

impl Inner {
    fn new(now: Duration) -> Self {
        Self {
            start_time: now,
            paused_at: None,
            virtual_base: 0.0,
            tasks: Vec::new(),
            next_id: 0,
            dropped_on_resume: 0,
        }
    }

    fn elapsed(&self, now: Duration) -> f64 {
        let until = self.paused_at.unwrap_or(now);
        until.saturating_sub(self.start_time).as_secs_f64()
    }
}

/// One-shot timers against a virtual clock that can be paused and resumed.
///
/// Nothing fires on its own: the frame driver calls [`PausableScheduler::take_due`] once per
/// frame and dispatches whatever comes back, earliest deadline first. `pause`, `resume` and
/// `clear` may be called from any thread.
///
/// Tasks scheduled while paused are kept and their delay starts counting at the next resume.
pub struct PausableScheduler {
    clock: Arc<dyn Clock>,
    policy: MissedTaskPolicy,
    inner: Mutex<Inner>,
}

impl PausableScheduler {
    pub fn new(clock: Arc<dyn Clock>, policy: MissedTaskPolicy) -> Self {
        let now = clock.now();

        Self {
            clock,
            policy,
            inner: Mutex::new(Inner::new(now)),
        }
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        let Ok(inner) = self.inner.lock() else {
            bail!("Failed to lock the scheduler..!")
        };

        Ok(inner)
    }

    pub fn schedule(&self, command: Command, delay_seconds: f64) -> anyhow::Result<TaskHandle> {
        if !delay_seconds.is_finite() || delay_seconds < 0.0 {
            bail!("Refusing to schedule {:?} with delay {}..!", command, delay_seconds);
        }

        let now = self.clock.now();
        let mut inner = self.lock()?;
        let id = TaskHandle(inner.next_id);
        inner.next_id += 1;

        let registered_at = inner.elapsed(now);
        inner.tasks.push(ScheduledTask {
            id,
            command,
            registered_at,
            delay_seconds,
        });

        Ok(id)
    }

    pub fn cancel(&self, handle: TaskHandle) -> anyhow::Result<bool> {
        let mut inner = self.lock()?;
        let before = inner.tasks.len();
        inner.tasks.retain(|task| task.id != handle);

        Ok(inner.tasks.len() != before)
    }

    /// Freeze the clock. Returns false when it was already paused.
    pub fn pause(&self) -> anyhow::Result<bool> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        if inner.paused_at.is_some() {
            return Ok(false);
        }

        inner.paused_at = Some(now);
        info!(
            "Paused at {:.3}s with {} pending task(s)..!",
            inner.virtual_base + inner.elapsed(now),
            inner.tasks.len()
        );

        Ok(true)
    }

    /// A task keeps whatever part of its delay had not yet elapsed when the clock was
    /// paused. Tasks whose deadline had already passed follow the [`MissedTaskPolicy`].
    /// Returns false when the clock was not paused.
    pub fn resume(&self) -> anyhow::Result<bool> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let Some(paused_at) = inner.paused_at else {
            return Ok(false);
        };

        let elapsed_before_pause = paused_at.saturating_sub(inner.start_time).as_secs_f64();
        let mut kept: Vec<ScheduledTask> = Vec::with_capacity(inner.tasks.len());
        let mut dropped = 0;

        for task in inner.tasks.drain(..) {
            let remaining = task.deadline() - elapsed_before_pause;

            let delay_seconds = if remaining >= 0.0 {
                remaining
            } else {
                match self.policy {
                    MissedTaskPolicy::Drop => {
                        debug!(
                            "Dropping {:?}, its deadline passed {:.3}s before the pause..!",
                            task.command, -remaining
                        );
                        dropped += 1;
                        continue;
                    }
                    MissedTaskPolicy::FireOnResume => 0.0,
                }
            };

            kept.push(ScheduledTask {
                registered_at: 0.0,
                delay_seconds,
                ..task
            });
        }

        if dropped > 0 {
            warn!(
                "{} task(s) expired while paused and were dropped; held notes may desync..!",
                dropped
            );
        }

        inner.tasks = kept;
        inner.dropped_on_resume += dropped;
        inner.virtual_base += elapsed_before_pause;
        inner.start_time = now;
        inner.paused_at = None;

        info!("Resumed with {} pending task(s)..!", inner.tasks.len());

        Ok(true)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        let pending = inner.tasks.len();
        let dropped = inner.dropped_on_resume;
        let next_id = inner.next_id;

        *inner = Inner::new(now);
        inner.dropped_on_resume = dropped;
        inner.next_id = next_id;

        if pending > 0 {
            debug!("Cleared {} pending task(s)..!", pending);
        }

        Ok(())
    }

    /// Remove and return every task whose deadline has passed, earliest first.
    /// Ties keep scheduling order. Always empty while paused.
    pub fn take_due(&self) -> anyhow::Result<Vec<Command>> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        if inner.paused_at.is_some() {
            return Ok(Vec::new());
        }

        let elapsed = inner.elapsed(now) + DEADLINE_SLACK_S;
        let mut due: Vec<ScheduledTask> = Vec::new();

        inner.tasks.retain(|task| {
            if task.deadline() <= elapsed {
                due.push(*task);
                false
            } else {
                true
            }
        });

        due.sort_by(|a, b| a.deadline().total_cmp(&b.deadline()).then(a.id.0.cmp(&b.id.0)));

        Ok(due.into_iter().map(|task| task.command).collect())
    }

    pub fn state(&self) -> anyhow::Result<SchedulerState> {
        let inner = self.lock()?;

        Ok(match inner.paused_at {
            Some(_) => SchedulerState::Paused,
            None => SchedulerState::Running,
        })
    }

    pub fn is_paused(&self) -> anyhow::Result<bool> {
        Ok(self.state()? == SchedulerState::Paused)
    }

    pub fn pending(&self) -> anyhow::Result<usize> {
        Ok(self.lock()?.tasks.len())
    }

    pub fn pending_tasks(&self) -> anyhow::Result<Vec<ScheduledTask>> {
        Ok(self.lock()?.tasks.clone())
    }

    pub fn dropped_on_resume(&self) -> anyhow::Result<usize> {
        Ok(self.lock()?.dropped_on_resume)
    }

    /// Running time since the last clear, paused stretches left out.
    pub fn virtual_elapsed(&self) -> anyhow::Result<f64> {
        let now = self.clock.now();
        let inner = self.lock()?;

        Ok(inner.virtual_base + inner.elapsed(now))
    }
}
