use crate::engine::{InputPort, NoteMessage, OutputPort};
use crate::error::{GameError, GameResult};
use anyhow::bail;
use log::{debug, info, trace};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use midly::MidiMessage;
use midly::live::LiveEvent;
use midly::num::{u4, u7};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

const CLIENT_NAME: &str = "walking-piano";

#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl OutputPort for NullOutput {
    fn send(&self, message: NoteMessage) -> anyhow::Result<()> {
        trace!("(silent) {:?}", message);
        Ok(())
    }

    fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn port_error(why: impl std::fmt::Display) -> GameError {
    GameError::Port(why.to_string())
}

/// Exact name first, then the first port whose name contains `wanted`, ignoring case.
pub fn pick_port(names: &[String], wanted: &str) -> Option<usize> {
    let wanted_lower = wanted.to_lowercase();

    names.iter().position(|n| n == wanted).or_else(|| {
        names
            .iter()
            .position(|n| n.to_lowercase().contains(&wanted_lower))
    })
}

fn matching<'a, P>(ports: &'a [P], names: &'a [String], wanted: &str) -> Option<(&'a P, &'a String)> {
    let index = pick_port(names, wanted)?;
    Some((ports.get(index)?, names.get(index)?))
}

pub fn list_ports() -> GameResult<(Vec<String>, Vec<String>)> {
    let input = MidiInput::new(CLIENT_NAME).map_err(port_error)?;
    let output = MidiOutput::new(CLIENT_NAME).map_err(port_error)?;

    let inputs = input
        .ports()
        .iter()
        .filter_map(|p| input.port_name(p).ok())
        .collect();
    let outputs = output
        .ports()
        .iter()
        .filter_map(|p| output.port_name(p).ok())
        .collect();

    Ok((inputs, outputs))
}

pub fn encode_note(message: NoteMessage, channel: u8) -> anyhow::Result<Vec<u8>> {
    let (note, velocity) = match message {
        NoteMessage::NoteOn { note, velocity } | NoteMessage::NoteOff { note, velocity } => {
            (note, velocity)
        }
    };

    if note > 127 || velocity > 127 || channel > 15 {
        bail!("Refusing to send out-of-range {:?}..!", message);
    }

    let (key, vel) = (u7::new(note), u7::new(velocity));
    let message = match message {
        NoteMessage::NoteOn { .. } => MidiMessage::NoteOn { key, vel },
        NoteMessage::NoteOff { .. } => MidiMessage::NoteOff { key, vel },
    };

    let mut bytes = Vec::with_capacity(3);
    LiveEvent::Midi { channel: u4::new(channel), message }.write_std(&mut bytes)?;

    Ok(bytes)
}

/// Note messages on any channel. Everything else on the wire is skipped.
pub fn decode_note(bytes: &[u8]) -> Option<NoteMessage> {
    match LiveEvent::parse(bytes) {
        Ok(LiveEvent::Midi { message, .. }) => match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => Some(NoteMessage::NoteOn {
                note: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOn { key, vel } | MidiMessage::NoteOff { key, vel } => {
                Some(NoteMessage::NoteOff {
                    note: key.as_int(),
                    velocity: vel.as_int(),
                })
            }
            _ => None,
        },
        Ok(_) => None,
        Err(why) => {
            debug!("Skipping unparsable MIDI bytes {:02X?} | why: {:?}", bytes, why);
            None
        }
    }
}

pub struct MidirOutput {
    name: String,
    channel: u8,
    conn: Mutex<MidiOutputConnection>,
}

impl MidirOutput {
    pub fn connect(wanted: &str) -> GameResult<Self> {
        let output = MidiOutput::new(CLIENT_NAME).map_err(port_error)?;
        let ports = output.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| output.port_name(p).unwrap_or_default())
            .collect();

        let Some((port, name)) = matching(&ports, &names, wanted) else {
            return Err(GameError::Port(format!(
                "no MIDI output matches '{}' (have {:?})",
                wanted, names
            )));
        };

        let conn = output
            .connect(port, "walking-piano-out")
            .map_err(port_error)?;
        info!("Opened MIDI output '{}'..!", name);

        Ok(Self {
            name: name.clone(),
            channel: 0,
            conn: Mutex::new(conn),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl OutputPort for MidirOutput {
    fn send(&self, message: NoteMessage) -> anyhow::Result<()> {
        let bytes = encode_note(message, self.channel)?;

        let Ok(mut conn) = self.conn.lock() else {
            bail!("Failed to lock MIDI output..!")
        };

        conn.send(&bytes).map_err(port_error)?;
        Ok(())
    }
}

/// Keeps a system MIDI input open. Its notes arrive on the [`ChannelInput`] handed out
/// by [`MidirInput::connect`] until this is dropped.
pub struct MidirInput {
    name: String,
    _conn: MidiInputConnection<()>,
}

impl MidirInput {
    pub fn connect(wanted: &str) -> GameResult<(Self, ChannelInput)> {
        let mut input = MidiInput::new(CLIENT_NAME).map_err(port_error)?;
        input.ignore(Ignore::All);

        let ports = input.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| input.port_name(p).unwrap_or_default())
            .collect();

        let Some((port, name)) = matching(&ports, &names, wanted) else {
            return Err(GameError::Port(format!(
                "no MIDI input matches '{}' (have {:?})",
                wanted, names
            )));
        };

        let (tx, channel_input) = ChannelInput::new();
        let conn = input
            .connect(
                port,
                "walking-piano-in",
                move |_stamp, bytes, _| {
                    if let Some(message) = decode_note(bytes) {
                        let _ = tx.send(message);
                    }
                },
                (),
            )
            .map_err(port_error)?;
        info!("Opened MIDI input '{}'..!", name);

        Ok((
            Self {
                name: name.clone(),
                _conn: conn,
            },
            channel_input,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub struct ChannelInput {
    rx: Receiver<NoteMessage>,
}

impl ChannelInput {
    pub fn new() -> (Sender<NoteMessage>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl InputPort for ChannelInput {
    fn poll(&mut self) -> anyhow::Result<Option<NoteMessage>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Ok(None),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingOutput {
    sent: Mutex<Vec<NoteMessage>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NoteMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl OutputPort for RecordingOutput {
    fn send(&self, message: NoteMessage) -> anyhow::Result<()> {
        let Ok(mut sent) = self.sent.lock() else {
            bail!("Failed to lock recorded messages..!")
        };

        sent.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encodes_channel_messages() {
        env_logger::try_init().unwrap_or(());

        let on = encode_note(NoteMessage::NoteOn { note: 60, velocity: 100 }, 1).unwrap();
        let off = encode_note(NoteMessage::NoteOff { note: 60, velocity: 0 }, 1).unwrap();
        assert_eq!(on, vec![0x91, 60, 100]);
        assert_eq!(off, vec![0x81, 60, 0]);

        assert!(encode_note(NoteMessage::NoteOn { note: 200, velocity: 100 }, 0).is_err());
        assert!(encode_note(NoteMessage::NoteOn { note: 60, velocity: 128 }, 0).is_err());
        assert!(encode_note(NoteMessage::NoteOn { note: 60, velocity: 1 }, 16).is_err());
    }

    #[test]
    fn decodes_only_note_messages() {
        env_logger::try_init().unwrap_or(());

        assert_eq!(
            decode_note(&[0x90, 60, 90]),
            Some(NoteMessage::NoteOn { note: 60, velocity: 90 })
        );
        assert_eq!(
            decode_note(&[0x9F, 64, 0]),
            Some(NoteMessage::NoteOff { note: 64, velocity: 0 })
        );
        assert_eq!(
            decode_note(&[0x80, 64, 10]),
            Some(NoteMessage::NoteOff { note: 64, velocity: 10 })
        );
        assert!(!decode_note(&[0x90, 60, 0]).unwrap().is_press());

        // program change, clock tick
        assert_eq!(decode_note(&[0xC0, 5]), None);
        assert_eq!(decode_note(&[0xF8]), None);
        assert_eq!(decode_note(&[]), None);
    }

    #[test]
    fn ports_are_picked_by_name() {
        env_logger::try_init().unwrap_or(());

        let names = vec![
            "Midi Through:Midi Through Port-0 14:0".to_owned(),
            "FLUID Synth (1234):Synth input port (1234:0) 128:0".to_owned(),
            "Digital Piano:Digital Piano MIDI 1 20:0".to_owned(),
        ];

        assert_eq!(pick_port(&names, "fluid"), Some(1));
        assert_eq!(pick_port(&names, "Digital Piano"), Some(2));
        assert_eq!(pick_port(&names, &names[0]), Some(0));
        assert_eq!(pick_port(&names, "organ"), None);
        assert_eq!(pick_port(&[], "fluid"), None);
    }

    #[test]
    fn channel_input_never_blocks() {
        env_logger::try_init().unwrap_or(());

        let (tx, mut input) = ChannelInput::new();
        assert_eq!(input.poll().unwrap(), None);

        tx.send(NoteMessage::NoteOn { note: 21, velocity: 1 }).unwrap();
        assert_eq!(input.poll().unwrap().map(|m| m.note()), Some(21));

        drop(tx);
        assert_eq!(input.poll().unwrap(), None);
    }
}
