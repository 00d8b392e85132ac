use crate::error::{GameError, GameResult};
use crate::model::song::{RawEvent, RawEventKind};
use log::debug;
use std::time::Duration;

pub const DEFAULT_MICROS_PER_BEAT: f64 = 500_000.0;
pub const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

/// Fails unless `seconds` can be waited on as a [`Duration`].
pub(crate) fn playable_seconds(seconds: f64, what: &str) -> GameResult<f64> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(_) => Ok(seconds),
        Err(_) => Err(GameError::MalformedTiming(format!(
            "{} of {} seconds is out of range",
            what, seconds
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoBreakpoint {
    pub wall_time_seconds: f64,
    pub micros_per_beat: f64,
}

/// Either empty, meaning the default tempo holds for the whole file, or starting with a
/// breakpoint at 0.0 seconds. Breakpoints are sorted ascending and never change after
/// [`TempoMap::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    breakpoints: Vec<TempoBreakpoint>,
    default_micros_per_beat: f64,
}

impl TempoMap {
    pub fn build(events: &[RawEvent], ticks_per_beat: u32, tempo_scale: f64) -> GameResult<Self> {
        Self::build_with_default(events, ticks_per_beat, tempo_scale, None)
    }

    /// Walk a tick stream once, accumulating wall-clock time under whichever tempo is
    /// active, and record a breakpoint for every tempo marker.
    ///
    /// Every tempo, the default included, is multiplied by `tempo_scale`.
    /// `default_bpm` replaces the standard 120 BPM used before the first marker.
    pub fn build_with_default(
        events: &[RawEvent],
        ticks_per_beat: u32,
        tempo_scale: f64,
        default_bpm: Option<f64>,
    ) -> GameResult<Self> {
        if ticks_per_beat == 0 {
            return Err(GameError::MalformedTiming(
                "ticks per beat is zero".to_owned(),
            ));
        }

        if !tempo_scale.is_finite() || tempo_scale <= 0.0 {
            return Err(GameError::MalformedTiming(format!(
                "tempo scale must be positive, got {}",
                tempo_scale
            )));
        }

        let default_micros_per_beat = match default_bpm {
            Some(bpm) if bpm.is_finite() && bpm > 0.0 => MICROSECONDS_PER_MINUTE / bpm,
            Some(bpm) => {
                return Err(GameError::MalformedTiming(format!(
                    "default tempo must be positive, got {} bpm",
                    bpm
                )));
            }
            None => DEFAULT_MICROS_PER_BEAT,
        } * tempo_scale;

        if !default_micros_per_beat.is_finite() {
            return Err(GameError::MalformedTiming(format!(
                "tempo scale {} overflows the default tempo",
                tempo_scale
            )));
        }

        let ticks_per_beat = ticks_per_beat as f64;
        let mut elapsed = 0.0;
        let mut active = default_micros_per_beat;
        let mut breakpoints: Vec<TempoBreakpoint> = Vec::new();

        for event in events {
            elapsed += event.delta_ticks as f64 * active / (ticks_per_beat * 1_000_000.0);
            playable_seconds(elapsed, "tempo map position")?;

            if let RawEventKind::SetTempo { micros_per_beat } = event.kind {
                if micros_per_beat == 0 {
                    return Err(GameError::MalformedTiming(format!(
                        "zero microseconds per beat at {:.6}s",
                        elapsed
                    )));
                }

                if breakpoints.is_empty() && elapsed > 0.0 {
                    breakpoints.push(TempoBreakpoint {
                        wall_time_seconds: 0.0,
                        micros_per_beat: default_micros_per_beat,
                    });
                }

                active = micros_per_beat as f64 * tempo_scale;
                if !active.is_finite() {
                    return Err(GameError::MalformedTiming(format!(
                        "tempo scale {} overflows {} us/beat",
                        tempo_scale, micros_per_beat
                    )));
                }

                // two markers on one tick: the later one wins
                match breakpoints.last_mut() {
                    Some(last) if last.wall_time_seconds == elapsed => last.micros_per_beat = active,
                    _ => breakpoints.push(TempoBreakpoint {
                        wall_time_seconds: elapsed,
                        micros_per_beat: active,
                    }),
                }

                debug!(
                    "Tempo change at {:.6}s -> {} us/beat (scaled: {:.1})",
                    elapsed, micros_per_beat, active
                );
            }
        }

        Ok(Self {
            breakpoints,
            default_micros_per_beat,
        })
    }

    pub fn breakpoints(&self) -> &[TempoBreakpoint] {
        &self.breakpoints
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn default_micros_per_beat(&self) -> f64 {
        self.default_micros_per_beat
    }

    pub fn micros_per_beat_at(&self, seconds: f64) -> f64 {
        let idx = self
            .breakpoints
            .partition_point(|bp| bp.wall_time_seconds <= seconds);

        match idx {
            0 => self.default_micros_per_beat,
            n => self.breakpoints[n - 1].micros_per_beat,
        }
    }

    pub fn bpm_at(&self, seconds: f64) -> f64 {
        MICROSECONDS_PER_MINUTE / self.micros_per_beat_at(seconds)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::song::RawEventKind::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9
    }

    #[test]
    fn no_markers_means_empty_map() {
        env_logger::try_init().unwrap_or(());

        let events = vec![
            RawEvent::new(0, NoteOn { note: 60, velocity: 90 }),
            RawEvent::new(480, NoteOff { note: 60, velocity: 0 }),
        ];

        let map = TempoMap::build(&events, 480, 1.0).unwrap();
        assert!(map.is_empty());
        assert!(approx_eq(map.bpm_at(3.0), 120.0));

        let slow = TempoMap::build_with_default(&events, 480, 1.0, Some(80.0)).unwrap();
        assert!(slow.is_empty());
        assert!(approx_eq(slow.bpm_at(0.0), 80.0));
    }

    #[test]
    fn markers_become_breakpoints_on_the_wall_clock() {
        env_logger::try_init().unwrap_or(());

        let events = vec![
            RawEvent::new(0, SetTempo { micros_per_beat: 500_000 }),
            RawEvent::new(960, SetTempo { micros_per_beat: 1_000_000 }),
            RawEvent::new(480, Meta),
            RawEvent::new(480, SetTempo { micros_per_beat: 250_000 }),
        ];

        let map = TempoMap::build(&events, 480, 1.0).unwrap();
        let bps = map.breakpoints();
        assert_eq!(bps.len(), 3);

        // two beats at 120 bpm, then two beats at 60 bpm
        assert!(approx_eq(bps[0].wall_time_seconds, 0.0));
        assert!(approx_eq(bps[1].wall_time_seconds, 1.0));
        assert!(approx_eq(bps[2].wall_time_seconds, 3.0));
        assert!(approx_eq(map.bpm_at(2.0), 60.0));
        assert!(approx_eq(map.bpm_at(3.5), 240.0));
    }

    #[test]
    fn late_first_marker_gets_a_default_breakpoint_at_zero() {
        env_logger::try_init().unwrap_or(());

        let events = vec![RawEvent::new(480, SetTempo { micros_per_beat: 1_000_000 })];

        let map = TempoMap::build(&events, 480, 1.0).unwrap();
        let bps = map.breakpoints();
        assert_eq!(bps.len(), 2);
        assert!(approx_eq(bps[0].wall_time_seconds, 0.0));
        assert!(approx_eq(bps[0].micros_per_beat, DEFAULT_MICROS_PER_BEAT));
        assert!(approx_eq(bps[1].wall_time_seconds, 0.5));
    }

    #[test]
    fn tempo_scale_stretches_every_tempo() {
        env_logger::try_init().unwrap_or(());

        let events = vec![
            RawEvent::new(480, SetTempo { micros_per_beat: 400_000 }),
        ];

        let map = TempoMap::build(&events, 480, 2.0).unwrap();
        let bps = map.breakpoints();
        assert!(approx_eq(bps[0].micros_per_beat, 1_000_000.0));
        assert!(approx_eq(bps[1].wall_time_seconds, 1.0));
        assert!(approx_eq(bps[1].micros_per_beat, 800_000.0));
    }

    #[test]
    fn malformed_timing_is_rejected() {
        env_logger::try_init().unwrap_or(());

        assert!(matches!(
            TempoMap::build(&[], 0, 1.0),
            Err(GameError::MalformedTiming(_))
        ));
        assert!(matches!(
            TempoMap::build(&[RawEvent::new(0, SetTempo { micros_per_beat: 0 })], 480, 1.0),
            Err(GameError::MalformedTiming(_))
        ));
        assert!(matches!(
            TempoMap::build(&[], 480, 0.0),
            Err(GameError::MalformedTiming(_))
        ));
        assert!(matches!(
            TempoMap::build_with_default(&[], 480, 1.0, Some(-5.0)),
            Err(GameError::MalformedTiming(_))
        ));
    }

    #[test]
    fn huge_tempo_scale_is_rejected() {
        env_logger::try_init().unwrap_or(());

        let marker = [RawEvent::new(0, SetTempo { micros_per_beat: 500_000 })];
        assert!(matches!(
            TempoMap::build(&marker, 480, 1e305),
            Err(GameError::MalformedTiming(_))
        ));
        assert!(matches!(
            TempoMap::build(&[], 480, f64::MAX),
            Err(GameError::MalformedTiming(_))
        ));

        // finite, but no clock can wait that long
        let late = [RawEvent::new(100_000, SetTempo { micros_per_beat: 500_000 })];
        assert!(matches!(
            TempoMap::build(&late, 480, 1e300),
            Err(GameError::MalformedTiming(_))
        ));
    }
}
