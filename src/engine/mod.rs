use log::warn;

pub mod clock;
pub mod lifecycle;
pub mod ports;
pub mod scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMessage {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
}

impl NoteMessage {
    pub fn note(&self) -> u8 {
        match *self {
            NoteMessage::NoteOn { note, .. } | NoteMessage::NoteOff { note, .. } => note,
        }
    }

    /// NoteOn with velocity zero counts as a release, as on the wire.
    pub fn is_press(&self) -> bool {
        matches!(*self, NoteMessage::NoteOn { velocity, .. } if velocity > 0)
    }
}

pub trait OutputPort: Send + Sync {
    fn send(&self, message: NoteMessage) -> anyhow::Result<()>;

    fn note_on(&self, note: u8, velocity: u8) -> anyhow::Result<()> {
        self.send(NoteMessage::NoteOn { note, velocity })
    }

    fn note_off(&self, note: u8) -> anyhow::Result<()> {
        self.send(NoteMessage::NoteOff { note, velocity: 0 })
    }

    fn reset(&self) -> anyhow::Result<()> {
        for note in 0..=127 {
            self.note_off(note)?;
        }

        Ok(())
    }

    /// Send and log on failure. A port hiccup never stops a session.
    fn send_best_effort(&self, message: NoteMessage) {
        if let Err(why) = self.send(message) {
            warn!("Failed to send {:?} | why: {:?}", message, why);
        }
    }
}

/// A keyboard the player presses. Never blocks.
pub trait InputPort: Send {
    fn poll(&mut self) -> anyhow::Result<Option<NoteMessage>>;
}
