use crate::error::{GameError, GameResult};
use crate::model::song::*;
use log::debug;
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> GameResult<MidiData> {
    let bytes = fs::read(path.as_ref()).map_err(|e| GameError::FileUnreadable {
        path: path.as_ref().to_path_buf(),
        reason: e.to_string(),
    })?;

    midi_bytes_to_data(&bytes, path.as_ref())
}

/// Decode a standard MIDI file into tick-based tracks.
pub fn midi_bytes_to_data(bytes: &[u8], source_path: &Path) -> GameResult<MidiData> {
    let smf = Smf::parse(bytes)
        .map_err(|e| GameError::MalformedTiming(format!("Failed to parse MIDI: {:?}", e)))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u32,
        Timing::Timecode(_fps, _subframe) => return Err(GameError::UnsupportedTiming),
    };

    debug!("Ticks per quarter note: {}", ticks_per_beat);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let mut tracks: Vec<RawTrack> = Vec::with_capacity(smf.tracks.len());

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut name: Option<String> = None;
        let mut events: Vec<RawEvent> = Vec::with_capacity(track.len());

        for event in track.iter() {
            let kind = match &event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micro)) => RawEventKind::SetTempo {
                    micros_per_beat: micro.as_int(),
                },
                TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => {
                    if name.is_none() {
                        name = Some(String::from_utf8_lossy(bytes).into_owned());
                        debug!("Track {} name: {:?}", track_idx, name);
                    }
                    RawEventKind::Meta
                }
                TrackEventKind::Meta(_) => RawEventKind::Meta,
                TrackEventKind::Midi { message, .. } => match message {
                    MidiMessage::NoteOn { key, vel } => RawEventKind::NoteOn {
                        note: key.as_int(),
                        velocity: vel.as_int(),
                    },
                    MidiMessage::NoteOff { key, vel } => RawEventKind::NoteOff {
                        note: key.as_int(),
                        velocity: vel.as_int(),
                    },
                    _ => RawEventKind::Other,
                },
                _ => RawEventKind::Other,
            };

            events.push(RawEvent {
                delta_ticks: event.delta.as_int(),
                kind,
            });
        }

        tracks.push(RawTrack { name, events });
    }

    Ok(MidiData {
        title: source_path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string()),
        ticks_per_beat,
        tracks,
    })
}
