use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DecoderState {
    Ready = 0,
    Started = 1,
    Paused = 2,
    Stopped = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
}

impl DecoderState {
    /// State reached by applying `command`, or `None` when the command is
    /// meaningless in this state and must be ignored.
    pub fn transition(self, command: Command) -> Option<DecoderState> {
        match (self, command) {
            (DecoderState::Ready, Command::Start) => Some(DecoderState::Started),
            (DecoderState::Started, Command::Pause) => Some(DecoderState::Paused),
            (DecoderState::Paused, Command::Resume) => Some(DecoderState::Started),
            (DecoderState::Started | DecoderState::Paused, Command::Stop) => {
                Some(DecoderState::Stopped)
            }
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DecoderState::Ready,
            1 => DecoderState::Started,
            2 => DecoderState::Paused,
            _ => DecoderState::Stopped,
        }
    }
}

/// Lock-free holder for the decoder state, shared with the worker.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(DecoderState::Ready as u8))
    }

    pub fn get(&self) -> DecoderState {
        DecoderState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Atomically apply `command`. Returns the new state if a transition
    /// happened; concurrent callers racing on the same command see exactly
    /// one success.
    pub fn apply(&self, command: Command) -> Option<DecoderState> {
        let mut current = self.get();
        loop {
            let next = current.transition(command)?;
            match self.0.compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(next),
                Err(actual) => current = DecoderState::from_u8(actual),
            }
        }
    }
}
