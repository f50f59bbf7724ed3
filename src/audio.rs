//! Playback: the engine state machine, its player and precache threads, the
//! bounded output buffer and the device backends behind it.

mod dsp;
mod engine;
mod outbuf;
mod player;
mod precache;
mod sink;
mod types;

pub use dsp::{Dsp, Equalizer, SoftMixer};
pub use engine::{Engine, EngineOptions, Status, backend_factory};
pub use outbuf::{OutputBuffer, SinkFactory, SpaceNotify, TimeCallback};
pub use sink::{AudioSink, NullSink, RodioSink, open_first};
pub use types::{PlayState, SoundParams};

#[cfg(test)]
mod tests;
