use std::collections::BTreeMap;
use std::io;

use crate::audio::PlayState;
use crate::playlist::Options;
use crate::tags::FileTags;

use super::ProtocolError;
use super::channel::{Channel, Transport};

/// Event opcodes. Grouped by family in `0x8000..0x9000`, disjoint from the
/// command space.
pub mod op {
    pub const PONG: i32 = 0x8001;
    pub const BUSY: i32 = 0x8002;
    pub const EXIT: i32 = 0x8003;
    pub const DATA: i32 = 0x8004;

    pub const STATE: i32 = 0x8101;
    pub const CTIME: i32 = 0x8102;
    pub const BITRATE: i32 = 0x8103;
    pub const AVG_BITRATE: i32 = 0x8104;
    pub const RATE: i32 = 0x8105;
    pub const CHANNELS: i32 = 0x8106;
    pub const SONG: i32 = 0x8107;

    pub const PLIST_ADD: i32 = 0x8201;
    pub const PLIST_DEL: i32 = 0x8202;
    pub const PLIST_MOVE: i32 = 0x8203;
    pub const PLIST_CLEAR: i32 = 0x8204;

    pub const FILE_TAGS: i32 = 0x8301;
    pub const FILE_RATING: i32 = 0x8302;

    pub const MIXER_CHANGE: i32 = 0x8401;

    pub const OPTIONS: i32 = 0x8501;

    pub const SRV_ERROR: i32 = 0x8601;
    pub const STATUS_MSG: i32 = 0x8602;
}

/// Payload of an `EV_DATA` reply. The schema is whatever the answered
/// command promises; the reply carries no type tag of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Int(i32),
    Str(String),
    StrSet(Vec<String>),
    Map(BTreeMap<String, String>),
}

/// A server notification, either answering a command or broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pong,
    Busy,
    Exit,
    Data(Reply),

    State(PlayState),
    Ctime(i32),
    Bitrate(i32),
    AvgBitrate(i32),
    Rate(i32),
    Channels(i32),
    Song(Option<String>),

    PlistAdd { items: Vec<String>, index: i32 },
    PlistDel(i32),
    PlistMove { from: i32, to: i32 },
    PlistClear,

    FileTags { path: String, tags: FileTags },
    FileRating { path: String, rating: i32 },

    MixerChange(i32),
    Options(Options),

    SrvError(String),
    StatusMsg(String),
}

impl Event {
    pub fn opcode(&self) -> i32 {
        match self {
            Event::Pong => op::PONG,
            Event::Busy => op::BUSY,
            Event::Exit => op::EXIT,
            Event::Data(_) => op::DATA,
            Event::State(_) => op::STATE,
            Event::Ctime(_) => op::CTIME,
            Event::Bitrate(_) => op::BITRATE,
            Event::AvgBitrate(_) => op::AVG_BITRATE,
            Event::Rate(_) => op::RATE,
            Event::Channels(_) => op::CHANNELS,
            Event::Song(_) => op::SONG,
            Event::PlistAdd { .. } => op::PLIST_ADD,
            Event::PlistDel(_) => op::PLIST_DEL,
            Event::PlistMove { .. } => op::PLIST_MOVE,
            Event::PlistClear => op::PLIST_CLEAR,
            Event::FileTags { .. } => op::FILE_TAGS,
            Event::FileRating { .. } => op::FILE_RATING,
            Event::MixerChange(_) => op::MIXER_CHANGE,
            Event::Options(_) => op::OPTIONS,
            Event::SrvError(_) => op::SRV_ERROR,
            Event::StatusMsg(_) => op::STATUS_MSG,
        }
    }

    /// Write opcode and fields. Callers bracket this with a coalesce region.
    pub fn write_fields<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.send(&self.opcode())?;
        match self {
            Event::Pong | Event::Busy | Event::Exit | Event::PlistClear => Ok(()),
            Event::Data(reply) => match reply {
                Reply::Int(v) => ch.send(v),
                Reply::Str(s) => ch.send_str(s),
                Reply::StrSet(items) => ch.send(items),
                Reply::Map(map) => ch.send(map),
            },
            Event::State(state) => ch.send(&state.to_wire()),
            Event::Ctime(v)
            | Event::Bitrate(v)
            | Event::AvgBitrate(v)
            | Event::Rate(v)
            | Event::Channels(v)
            | Event::PlistDel(v)
            | Event::MixerChange(v) => ch.send(v),
            Event::Song(path) => ch.send_str(path.as_deref().unwrap_or("")),
            Event::PlistAdd { items, index } => {
                ch.send(items)?;
                ch.send(index)
            }
            Event::PlistMove { from, to } => {
                ch.send(from)?;
                ch.send(to)
            }
            Event::FileTags { path, tags } => {
                ch.send_str(path)?;
                ch.send(tags)
            }
            Event::FileRating { path, rating } => {
                ch.send_str(path)?;
                ch.send(rating)
            }
            Event::Options(opts) => ch.send(&opts.to_bits()),
            Event::SrvError(msg) | Event::StatusMsg(msg) => ch.send_str(msg),
        }
    }

    /// Write the event as one contiguous transmission.
    pub fn write<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.begin_coalesce();
        let res = self.write_fields(ch);
        let flushed = ch.end_coalesce();
        res.and(flushed)
    }

    /// Append the event to the channel's packet queue.
    pub fn enqueue<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.begin_coalesce();
        let res = self.write_fields(ch);
        ch.enqueue_as_packet();
        res
    }

    /// Read the fields of an event whose opcode was already consumed.
    ///
    /// `EV_DATA` is not decodable here: its payload depends on which command
    /// it answers, so the caller reads it with the expected field type.
    pub fn read_body<T: Transport>(opcode: i32, ch: &mut Channel<T>) -> Result<Self, ProtocolError> {
        let ev = match opcode {
            op::PONG => Event::Pong,
            op::BUSY => Event::Busy,
            op::EXIT => Event::Exit,
            op::DATA => return Err(ProtocolError::UntypedReply),
            op::STATE => {
                let raw: i32 = ch.get()?;
                Event::State(PlayState::from_wire(raw).ok_or(ProtocolError::BadValue {
                    field: "state",
                    value: raw,
                })?)
            }
            op::CTIME => Event::Ctime(ch.get()?),
            op::BITRATE => Event::Bitrate(ch.get()?),
            op::AVG_BITRATE => Event::AvgBitrate(ch.get()?),
            op::RATE => Event::Rate(ch.get()?),
            op::CHANNELS => Event::Channels(ch.get()?),
            op::SONG => {
                let path: String = ch.get()?;
                Event::Song(Some(path).filter(|p| !p.is_empty()))
            }
            op::PLIST_ADD => Event::PlistAdd {
                items: ch.get()?,
                index: ch.get()?,
            },
            op::PLIST_DEL => Event::PlistDel(ch.get()?),
            op::PLIST_MOVE => Event::PlistMove {
                from: ch.get()?,
                to: ch.get()?,
            },
            op::PLIST_CLEAR => Event::PlistClear,
            op::FILE_TAGS => Event::FileTags {
                path: ch.get()?,
                tags: ch.get()?,
            },
            op::FILE_RATING => Event::FileRating {
                path: ch.get()?,
                rating: ch.get()?,
            },
            op::MIXER_CHANGE => Event::MixerChange(ch.get()?),
            op::OPTIONS => Event::Options(Options::from_bits(ch.get()?)),
            op::SRV_ERROR => Event::SrvError(ch.get()?),
            op::STATUS_MSG => Event::StatusMsg(ch.get()?),
            other => return Err(ProtocolError::UnknownEvent(other)),
        };
        Ok(ev)
    }
}
