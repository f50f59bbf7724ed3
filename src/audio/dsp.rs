//! In-place processing stages applied to decoded audio before output.

use crate::config::EqualizerPreset;

use super::types::SoundParams;

/// Software volume control, used instead of the device mixer when active.
#[derive(Debug, Clone)]
pub struct SoftMixer {
    pub active: bool,
    level: i32,
}

impl SoftMixer {
    pub fn new(active: bool, level: i32) -> Self {
        Self {
            active,
            level: level.clamp(0, 100),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn set_level(&mut self, level: i32) {
        self.level = level.clamp(0, 100);
    }

    pub fn process(&self, buf: &mut [f32], _params: SoundParams) {
        if self.level == 100 {
            return;
        }
        let gain = self.level as f32 / 100.0;
        buf.iter_mut().for_each(|s| *s *= gain);
    }
}

/// Preset-based gain stage.
#[derive(Debug, Clone)]
pub struct Equalizer {
    pub active: bool,
    presets: Vec<EqualizerPreset>,
    current: usize,
}

impl Equalizer {
    pub fn new(active: bool, presets: Vec<EqualizerPreset>) -> Self {
        Self {
            active,
            presets,
            current: 0,
        }
    }

    pub fn preset(&self) -> Option<&EqualizerPreset> {
        self.presets.get(self.current)
    }

    pub fn next_preset(&mut self) -> Option<&EqualizerPreset> {
        if !self.presets.is_empty() {
            self.current = (self.current + 1) % self.presets.len();
        }
        self.preset()
    }

    pub fn prev_preset(&mut self) -> Option<&EqualizerPreset> {
        if !self.presets.is_empty() {
            self.current = (self.current + self.presets.len() - 1) % self.presets.len();
        }
        self.preset()
    }

    /// One-line description for status messages.
    pub fn describe(&self) -> String {
        match (self.active, self.preset()) {
            (false, _) => "Equalizer off".to_string(),
            (true, Some(p)) => format!("Equalizer: {} ({:+.1} dB)", p.name, p.preamp_db),
            (true, None) => "Equalizer on".to_string(),
        }
    }

    pub fn process(&self, buf: &mut [f32], _params: SoundParams) {
        let Some(preset) = self.preset() else {
            return;
        };
        if preset.preamp_db == 0.0 {
            return;
        }
        let gain = 10f32.powf(preset.preamp_db / 20.0);
        for s in buf.iter_mut() {
            *s = (*s * gain).clamp(-1.0, 1.0);
        }
    }
}

/// The processing chain: equalizer, then soft mixer, each only when active.
#[derive(Debug, Clone)]
pub struct Dsp {
    pub equalizer: Equalizer,
    pub softmixer: SoftMixer,
}

impl Dsp {
    pub fn process(&self, buf: &mut [f32], params: SoundParams) {
        if self.equalizer.active {
            self.equalizer.process(buf, params);
        }
        if self.softmixer.active {
            self.softmixer.process(buf, params);
        }
    }
}
