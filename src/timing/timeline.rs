use crate::error::{GameError, GameResult};
use crate::model::song::{MidiData, NoteKind, RawEvent, RawEventKind, TimedEvent};
use crate::timing::tempo_map::{TempoMap, playable_seconds};
use log::debug;

#[derive(Debug, Clone, Copy)]
pub struct TrackTimeline<'a> {
    tempo_map: &'a TempoMap,
    ticks_per_beat: f64,
}

impl<'a> TrackTimeline<'a> {
    pub fn new(tempo_map: &'a TempoMap, ticks_per_beat: u32) -> GameResult<Self> {
        if ticks_per_beat == 0 {
            return Err(GameError::MalformedTiming(
                "ticks per beat is zero".to_owned(),
            ));
        }

        Ok(Self {
            tempo_map,
            ticks_per_beat: ticks_per_beat as f64,
        })
    }

    /// Breakpoints are merged in as the walk passes them, so a delta that straddles a
    /// tempo change is split and each part converted under its own tempo. Tempo, meta
    /// and controller records only move time forward.
    ///
    /// A `delay_seconds` of exactly zero is a normal result: chord members and any two
    /// messages on the same tick come out that way. Whoever schedules these events has to
    /// keep them apart.
    pub fn extract(&self, events: &[RawEvent]) -> GameResult<Vec<TimedEvent>> {
        let breakpoints = self.tempo_map.breakpoints();
        let mut cursor = 0;
        let mut micros_per_beat = self.tempo_map.default_micros_per_beat();
        let mut now = 0.0_f64;
        let mut last_emitted = 0.0_f64;
        let mut out: Vec<TimedEvent> = Vec::new();

        for event in events {
            let mut remaining_ticks = event.delta_ticks as f64;

            loop {
                let span = self.ticks_to_seconds(remaining_ticks, micros_per_beat);

                match breakpoints.get(cursor) {
                    Some(bp) if bp.wall_time_seconds <= now + span => {
                        let used = (bp.wall_time_seconds - now).max(0.0) * self.ticks_per_beat
                            * 1_000_000.0
                            / micros_per_beat;

                        remaining_ticks = (remaining_ticks - used).max(0.0);
                        now = now.max(bp.wall_time_seconds);
                        micros_per_beat = bp.micros_per_beat;
                        cursor += 1;
                    }
                    _ => {
                        now += span;
                        break;
                    }
                }
            }

            playable_seconds(now, "event time")?;

            let (kind, note, velocity) = match event.kind {
                RawEventKind::NoteOn { note, velocity } if velocity > 0 => {
                    (NoteKind::On, note, velocity)
                }
                RawEventKind::NoteOn { note, velocity } | RawEventKind::NoteOff { note, velocity } => {
                    (NoteKind::Off, note, velocity)
                }
                RawEventKind::SetTempo { .. } | RawEventKind::Meta | RawEventKind::Other => continue,
            };

            out.push(TimedEvent {
                kind,
                note,
                velocity,
                delay_seconds: now - last_emitted,
                at_seconds: now,
            });
            last_emitted = now;
        }

        Ok(out)
    }

    pub fn extract_track(&self, midi: &MidiData, track: usize) -> GameResult<Vec<TimedEvent>> {
        let Some(raw) = midi.tracks.get(track) else {
            return Err(GameError::TrackUnavailable { track });
        };

        let events = self.extract(&raw.events)?;
        if events.is_empty() {
            debug!("Track {} has no note events..!", track);
            return Err(GameError::TrackUnavailable { track });
        }

        Ok(events)
    }

    /// Every track of a file interleaved by absolute time, tagged with its track index.
    ///
    /// Messages on the same instant keep track order, then file order.
    pub fn merged(&self, midi: &MidiData) -> GameResult<Vec<(usize, TimedEvent)>> {
        let mut all: Vec<(usize, TimedEvent)> = Vec::new();

        for (idx, track) in midi.tracks.iter().enumerate() {
            all.extend(self.extract(&track.events)?.into_iter().map(|e| (idx, e)));
        }

        all.sort_by(|a, b| a.1.at_seconds.total_cmp(&b.1.at_seconds));
        Ok(all)
    }

    fn ticks_to_seconds(&self, ticks: f64, micros_per_beat: f64) -> f64 {
        ticks * micros_per_beat / (self.ticks_per_beat * 1_000_000.0)
    }
}
