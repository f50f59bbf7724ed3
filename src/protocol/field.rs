//! Byte layout of every field type carried by commands and events.
//!
//! Integers and booleans travel as their in-memory representation in host
//! byte order; the protocol never leaves the machine. Strings are a `usize`
//! length followed by the raw UTF-8 bytes. Sequences carry no count, they end
//! with a sentinel instead.

use std::collections::BTreeMap;
use std::io;

use crate::tags::{FileTags, TagEdit};

use super::channel::{Channel, Transport};

/// Terminator of an integer set.
pub const INT_SET_END: i32 = -1;

/// Upper bound on a single string field; anything longer is garbage.
const MAX_STR_LEN: usize = 16 * 1024 * 1024;

/// A value with a fixed wire encoding.
pub trait Field: Sized {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()>;
    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self>;
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

impl Field for i32 {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.write_bytes(&self.to_ne_bytes())
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        let mut b = [0u8; 4];
        ch.read_bytes(&mut b)?;
        Ok(i32::from_ne_bytes(b))
    }
}

impl Field for i64 {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.write_bytes(&self.to_ne_bytes())
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        let mut b = [0u8; 8];
        ch.read_bytes(&mut b)?;
        Ok(i64::from_ne_bytes(b))
    }
}

impl Field for bool {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.write_bytes(&[u8::from(*self)])
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        let mut b = [0u8; 1];
        ch.read_bytes(&mut b)?;
        match b[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(invalid(format!("bad boolean byte {other}"))),
        }
    }
}

impl Field for String {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.send_str(self)
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        let mut len_buf = [0u8; size_of::<usize>()];
        ch.read_bytes(&mut len_buf)?;
        let len = usize::from_ne_bytes(len_buf);
        if len > MAX_STR_LEN {
            return Err(invalid(format!("string of {len} bytes exceeds limit")));
        }
        let mut bytes = vec![0u8; len];
        ch.read_bytes(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
    }
}

/// `set<int>`: values followed by `-1`. Negative values cannot be members.
impl Field for Vec<i32> {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        for v in self.iter().filter(|v| **v >= 0) {
            ch.send(v)?;
        }
        ch.send(&INT_SET_END)
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        let mut out = Vec::new();
        loop {
            let v: i32 = ch.get()?;
            if v == INT_SET_END {
                return Ok(out);
            }
            out.push(v);
        }
    }
}

/// `set<str>`: strings followed by an empty string. Empty strings cannot be
/// members.
impl Field for Vec<String> {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        for s in self.iter().filter(|s| !s.is_empty()) {
            ch.send_str(s)?;
        }
        ch.send_str("")
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        let mut out = Vec::new();
        loop {
            let s: String = ch.get()?;
            if s.is_empty() {
                return Ok(out);
            }
            out.push(s);
        }
    }
}

/// `map<str,str>`: key/value pairs ended by an empty key.
impl Field for BTreeMap<String, String> {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        for (k, v) in self.iter().filter(|(k, _)| !k.is_empty()) {
            ch.send_str(k)?;
            ch.send_str(v)?;
        }
        ch.send_str("")
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        let mut out = BTreeMap::new();
        loop {
            let k: String = ch.get()?;
            if k.is_empty() {
                return Ok(out);
            }
            let v: String = ch.get()?;
            out.insert(k, v);
        }
    }
}

/// Optional fields are a presence flag, then the value when present.
impl<V: Field> Field for Option<V> {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        match self {
            Some(v) => {
                ch.send(&true)?;
                ch.send(v)
            }
            None => ch.send(&false),
        }
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        if ch.get::<bool>()? {
            Ok(Some(ch.get()?))
        } else {
            Ok(None)
        }
    }
}

impl Field for FileTags {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.send(&self.title)?;
        ch.send(&self.artist)?;
        ch.send(&self.album)?;
        ch.send(&self.track)?;
        ch.send(&self.duration)?;
        ch.send(&self.rating)
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        Ok(FileTags {
            title: ch.get()?,
            artist: ch.get()?,
            album: ch.get()?,
            track: ch.get()?,
            duration: ch.get()?,
            rating: ch.get()?,
        })
    }
}

impl Field for TagEdit {
    fn put<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.send(&self.title)?;
        ch.send(&self.artist)?;
        ch.send(&self.album)?;
        ch.send(&self.track)
    }

    fn take<T: Transport>(ch: &mut Channel<T>) -> io::Result<Self> {
        Ok(TagEdit {
            title: ch.get()?,
            artist: ch.get()?,
            album: ch.get()?,
            track: ch.get()?,
        })
    }
}
