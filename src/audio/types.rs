//! Small shared audio types.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlayState {
    pub fn to_wire(self) -> i32 {
        match self {
            PlayState::Stopped => 0,
            PlayState::Playing => 1,
            PlayState::Paused => 2,
        }
    }

    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(PlayState::Stopped),
            1 => Some(PlayState::Playing),
            2 => Some(PlayState::Paused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayState::Stopped => "stopped",
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
        }
    }
}

/// Format of interleaved `f32` samples. Zeroes mean "not known yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoundParams {
    pub channels: u16,
    pub rate: u32,
}

impl SoundParams {
    pub fn is_known(&self) -> bool {
        self.channels > 0 && self.rate > 0
    }

    /// Samples (not frames) per second of audio.
    pub fn samples_per_sec(&self) -> usize {
        self.channels as usize * self.rate as usize
    }

    /// Samples covering `ms` milliseconds, rounded down to whole frames.
    pub fn samples_for_ms(&self, ms: u32) -> usize {
        let frames = self.rate as usize * ms as usize / 1000;
        frames * self.channels as usize
    }

    pub fn duration_of(&self, samples: usize) -> Duration {
        match self.samples_per_sec() {
            0 => Duration::ZERO,
            per_sec => Duration::from_secs_f64(samples as f64 / per_sec as f64),
        }
    }
}

/// What the control side can ask of a running player thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Request {
    Stop,
    Seek(Duration),
}
