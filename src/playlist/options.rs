/// Playback options that steer navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub shuffle: bool,
    pub repeat: bool,
    /// Advance when a song ends on its own.
    pub autonext: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: false,
            autonext: true,
        }
    }
}

const SHUFFLE: i32 = 1;
const REPEAT: i32 = 2;
const AUTONEXT: i32 = 4;

impl Options {
    pub fn to_bits(self) -> i32 {
        let mut bits = 0;
        if self.shuffle {
            bits |= SHUFFLE;
        }
        if self.repeat {
            bits |= REPEAT;
        }
        if self.autonext {
            bits |= AUTONEXT;
        }
        bits
    }

    /// Unknown bits are ignored.
    pub fn from_bits(bits: i32) -> Self {
        Self {
            shuffle: bits & SHUFFLE != 0,
            repeat: bits & REPEAT != 0,
            autonext: bits & AUTONEXT != 0,
        }
    }
}
