use std::io;

use crate::tags::TagEdit;

use super::ProtocolError;
use super::channel::{Channel, Transport};

/// Command opcodes. Grouped by family in `0x0000..0x1000`.
pub mod op {
    pub const PING: i32 = 0x001;
    pub const DISCONNECT: i32 = 0x002;
    pub const QUIT: i32 = 0x003;

    pub const PLAY_PATH: i32 = 0x101;
    pub const PLAY_INDEX: i32 = 0x102;
    pub const PLAY_LIST: i32 = 0x103;
    pub const STOP: i32 = 0x104;
    pub const PAUSE: i32 = 0x105;
    pub const UNPAUSE: i32 = 0x106;
    pub const NEXT: i32 = 0x107;
    pub const PREV: i32 = 0x108;
    pub const SEEK: i32 = 0x109;
    pub const JUMP_TO: i32 = 0x10a;
    pub const JUMP_TO_PERCENT: i32 = 0x10b;
    pub const GET_STATE: i32 = 0x10c;
    pub const GET_CTIME: i32 = 0x10d;
    pub const GET_CURRENT: i32 = 0x10e;
    pub const GET_BITRATE: i32 = 0x10f;
    pub const GET_AVG_BITRATE: i32 = 0x110;
    pub const GET_RATE: i32 = 0x111;
    pub const GET_CHANNELS: i32 = 0x112;
    pub const GET_STATUS: i32 = 0x113;

    pub const PLIST_ADD: i32 = 0x201;
    pub const PLIST_DEL: i32 = 0x202;
    pub const PLIST_MOVE: i32 = 0x203;
    pub const PLIST_CLEAR: i32 = 0x204;
    pub const PLIST_GET: i32 = 0x205;

    pub const GET_FILE_TAGS: i32 = 0x301;
    pub const SET_FILE_TAGS: i32 = 0x302;
    pub const SET_RATING: i32 = 0x303;
    pub const ABORT_TAGS_REQUESTS: i32 = 0x304;

    pub const GET_MIXER: i32 = 0x401;
    pub const SET_MIXER: i32 = 0x402;
    pub const TOGGLE_MIXER_CHANNEL: i32 = 0x403;
    pub const TOGGLE_SOFTMIXER: i32 = 0x404;
    pub const GET_MIXER_CHANNEL_NAME: i32 = 0x405;
    pub const TOGGLE_EQUALIZER: i32 = 0x406;
    pub const EQUALIZER_NEXT: i32 = 0x407;
    pub const EQUALIZER_PREV: i32 = 0x408;

    pub const GET_OPTIONS: i32 = 0x501;
    pub const TOGGLE_SHUFFLE: i32 = 0x502;
    pub const TOGGLE_REPEAT: i32 = 0x503;
    pub const TOGGLE_AUTONEXT: i32 = 0x504;
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Disconnect,
    Quit,

    PlayPath(String),
    PlayIndex(i32),
    PlayList { items: Vec<String>, index: i32 },
    Stop,
    Pause,
    Unpause,
    Next,
    Prev,
    Seek(i32),
    JumpTo(i32),
    JumpToPercent(i32),
    GetState,
    GetCtime,
    GetCurrent,
    GetBitrate,
    GetAvgBitrate,
    GetRate,
    GetChannels,
    GetStatus,

    /// `index == -1` appends.
    PlistAdd { items: Vec<String>, index: i32 },
    PlistDel(i32),
    PlistMove { from: i32, to: i32 },
    PlistClear,
    PlistGet,

    GetFileTags(String),
    SetFileTags { path: String, edit: TagEdit },
    SetRating { path: String, rating: i32 },
    AbortTagsRequests,

    GetMixer,
    SetMixer(i32),
    ToggleMixerChannel,
    ToggleSoftmixer,
    GetMixerChannelName,
    ToggleEqualizer,
    EqualizerNext,
    EqualizerPrev,

    GetOptions,
    ToggleShuffle,
    ToggleRepeat,
    ToggleAutonext,
}

impl Command {
    pub fn opcode(&self) -> i32 {
        match self {
            Command::Ping => op::PING,
            Command::Disconnect => op::DISCONNECT,
            Command::Quit => op::QUIT,
            Command::PlayPath(_) => op::PLAY_PATH,
            Command::PlayIndex(_) => op::PLAY_INDEX,
            Command::PlayList { .. } => op::PLAY_LIST,
            Command::Stop => op::STOP,
            Command::Pause => op::PAUSE,
            Command::Unpause => op::UNPAUSE,
            Command::Next => op::NEXT,
            Command::Prev => op::PREV,
            Command::Seek(_) => op::SEEK,
            Command::JumpTo(_) => op::JUMP_TO,
            Command::JumpToPercent(_) => op::JUMP_TO_PERCENT,
            Command::GetState => op::GET_STATE,
            Command::GetCtime => op::GET_CTIME,
            Command::GetCurrent => op::GET_CURRENT,
            Command::GetBitrate => op::GET_BITRATE,
            Command::GetAvgBitrate => op::GET_AVG_BITRATE,
            Command::GetRate => op::GET_RATE,
            Command::GetChannels => op::GET_CHANNELS,
            Command::GetStatus => op::GET_STATUS,
            Command::PlistAdd { .. } => op::PLIST_ADD,
            Command::PlistDel(_) => op::PLIST_DEL,
            Command::PlistMove { .. } => op::PLIST_MOVE,
            Command::PlistClear => op::PLIST_CLEAR,
            Command::PlistGet => op::PLIST_GET,
            Command::GetFileTags(_) => op::GET_FILE_TAGS,
            Command::SetFileTags { .. } => op::SET_FILE_TAGS,
            Command::SetRating { .. } => op::SET_RATING,
            Command::AbortTagsRequests => op::ABORT_TAGS_REQUESTS,
            Command::GetMixer => op::GET_MIXER,
            Command::SetMixer(_) => op::SET_MIXER,
            Command::ToggleMixerChannel => op::TOGGLE_MIXER_CHANNEL,
            Command::ToggleSoftmixer => op::TOGGLE_SOFTMIXER,
            Command::GetMixerChannelName => op::GET_MIXER_CHANNEL_NAME,
            Command::ToggleEqualizer => op::TOGGLE_EQUALIZER,
            Command::EqualizerNext => op::EQUALIZER_NEXT,
            Command::EqualizerPrev => op::EQUALIZER_PREV,
            Command::GetOptions => op::GET_OPTIONS,
            Command::ToggleShuffle => op::TOGGLE_SHUFFLE,
            Command::ToggleRepeat => op::TOGGLE_REPEAT,
            Command::ToggleAutonext => op::TOGGLE_AUTONEXT,
        }
    }

    /// Read one whole command: opcode, then its fields.
    pub fn read<T: Transport>(ch: &mut Channel<T>) -> Result<Self, ProtocolError> {
        let opcode: i32 = ch.get()?;
        Self::read_body(opcode, ch)
    }

    /// Read the fields of a command whose opcode was already consumed.
    pub fn read_body<T: Transport>(opcode: i32, ch: &mut Channel<T>) -> Result<Self, ProtocolError> {
        let cmd = match opcode {
            op::PING => Command::Ping,
            op::DISCONNECT => Command::Disconnect,
            op::QUIT => Command::Quit,
            op::PLAY_PATH => Command::PlayPath(ch.get()?),
            op::PLAY_INDEX => Command::PlayIndex(ch.get()?),
            op::PLAY_LIST => Command::PlayList {
                items: ch.get()?,
                index: ch.get()?,
            },
            op::STOP => Command::Stop,
            op::PAUSE => Command::Pause,
            op::UNPAUSE => Command::Unpause,
            op::NEXT => Command::Next,
            op::PREV => Command::Prev,
            op::SEEK => Command::Seek(ch.get()?),
            op::JUMP_TO => Command::JumpTo(ch.get()?),
            op::JUMP_TO_PERCENT => Command::JumpToPercent(ch.get()?),
            op::GET_STATE => Command::GetState,
            op::GET_CTIME => Command::GetCtime,
            op::GET_CURRENT => Command::GetCurrent,
            op::GET_BITRATE => Command::GetBitrate,
            op::GET_AVG_BITRATE => Command::GetAvgBitrate,
            op::GET_RATE => Command::GetRate,
            op::GET_CHANNELS => Command::GetChannels,
            op::GET_STATUS => Command::GetStatus,
            op::PLIST_ADD => Command::PlistAdd {
                items: ch.get()?,
                index: ch.get()?,
            },
            op::PLIST_DEL => Command::PlistDel(ch.get()?),
            op::PLIST_MOVE => Command::PlistMove {
                from: ch.get()?,
                to: ch.get()?,
            },
            op::PLIST_CLEAR => Command::PlistClear,
            op::PLIST_GET => Command::PlistGet,
            op::GET_FILE_TAGS => Command::GetFileTags(ch.get()?),
            op::SET_FILE_TAGS => Command::SetFileTags {
                path: ch.get()?,
                edit: ch.get()?,
            },
            op::SET_RATING => Command::SetRating {
                path: ch.get()?,
                rating: ch.get()?,
            },
            op::ABORT_TAGS_REQUESTS => Command::AbortTagsRequests,
            op::GET_MIXER => Command::GetMixer,
            op::SET_MIXER => Command::SetMixer(ch.get()?),
            op::TOGGLE_MIXER_CHANNEL => Command::ToggleMixerChannel,
            op::TOGGLE_SOFTMIXER => Command::ToggleSoftmixer,
            op::GET_MIXER_CHANNEL_NAME => Command::GetMixerChannelName,
            op::TOGGLE_EQUALIZER => Command::ToggleEqualizer,
            op::EQUALIZER_NEXT => Command::EqualizerNext,
            op::EQUALIZER_PREV => Command::EqualizerPrev,
            op::GET_OPTIONS => Command::GetOptions,
            op::TOGGLE_SHUFFLE => Command::ToggleShuffle,
            op::TOGGLE_REPEAT => Command::ToggleRepeat,
            op::TOGGLE_AUTONEXT => Command::ToggleAutonext,
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(cmd)
    }

    /// Write the command as one contiguous transmission.
    pub fn write<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.begin_coalesce();
        let res = self.write_fields(ch);
        let flushed = ch.end_coalesce();
        res.and(flushed)
    }

    fn write_fields<T: Transport>(&self, ch: &mut Channel<T>) -> io::Result<()> {
        ch.send(&self.opcode())?;
        match self {
            Command::PlayPath(path) | Command::GetFileTags(path) => ch.send_str(path),
            Command::PlayIndex(v)
            | Command::Seek(v)
            | Command::JumpTo(v)
            | Command::JumpToPercent(v)
            | Command::PlistDel(v)
            | Command::SetMixer(v) => ch.send(v),
            Command::PlayList { items, index } | Command::PlistAdd { items, index } => {
                ch.send(items)?;
                ch.send(index)
            }
            Command::PlistMove { from, to } => {
                ch.send(from)?;
                ch.send(to)
            }
            Command::SetFileTags { path, edit } => {
                ch.send_str(path)?;
                ch.send(edit)
            }
            Command::SetRating { path, rating } => {
                ch.send_str(path)?;
                ch.send(rating)
            }
            _ => Ok(()),
        }
    }
}
