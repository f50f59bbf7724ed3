use super::*;
use crate::audio::PlayState;
use crate::playlist::Options;
use crate::tags::{FileTags, TagEdit};
use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

fn pair() -> (Channel<UnixStream>, Channel<UnixStream>) {
    let (a, b) = UnixStream::pair().unwrap();
    (Channel::new(a), Channel::new(b))
}

fn round_trip<V: Field + PartialEq + std::fmt::Debug>(value: V) {
    let (mut tx, mut rx) = pair();
    tx.send(&value).unwrap();
    let back: V = rx.get().unwrap();
    assert_eq!(back, value);
}

/// In-memory transport whose writes follow a script: `Some(n)` accepts at
/// most `n` bytes, `None` reports `WouldBlock`. An exhausted script accepts
/// everything.
#[derive(Default)]
struct ScriptedTransport {
    script: VecDeque<Option<usize>>,
    written: Vec<u8>,
    write_calls: usize,
}

impl Read for ScriptedTransport {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::ErrorKind::WouldBlock.into())
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_calls += 1;
        match self.script.pop_front() {
            Some(None) => Err(std::io::ErrorKind::WouldBlock.into()),
            Some(Some(limit)) => {
                let n = limit.min(buf.len());
                self.written.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            None => {
                self.written.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn wait_readable(&self, _: Option<std::time::Duration>) -> std::io::Result<bool> {
        Ok(true)
    }
    fn wait_writable(&self) -> std::io::Result<()> {
        Ok(())
    }
    fn available(&self) -> std::io::Result<usize> {
        Ok(0)
    }
    fn readable_now(&self) -> std::io::Result<bool> {
        Ok(false)
    }
}

#[test]
fn scalar_fields_round_trip() {
    round_trip(0i32);
    round_trip(-1i32);
    round_trip(i32::MAX);
    round_trip(i64::MIN);
    round_trip(true);
    round_trip(false);
}

#[test]
fn strings_round_trip_including_empty() {
    round_trip(String::new());
    round_trip("plain".to_string());
    round_trip("ünïcødé/path with spaces.flac".to_string());
}

#[test]
fn sets_and_maps_round_trip_including_empty() {
    round_trip(Vec::<i32>::new());
    round_trip(vec![0, 7, 42]);
    round_trip(Vec::<String>::new());
    round_trip(vec!["a.mp3".to_string(), "b.ogg".to_string()]);
    round_trip(BTreeMap::<String, String>::new());

    let mut map = BTreeMap::new();
    map.insert("state".to_string(), "playing".to_string());
    map.insert("title".to_string(), String::new());
    round_trip(map);
}

#[test]
fn tag_records_round_trip() {
    round_trip(FileTags::default());
    round_trip(FileTags {
        title: Some("Song".into()),
        artist: None,
        album: Some("Album".into()),
        track: Some(3),
        duration: Some(241),
        rating: Some(0),
    });
    round_trip(TagEdit::default());
    round_trip(TagEdit {
        title: None,
        artist: Some("Someone".into()),
        album: None,
        track: Some(1),
    });
}

#[test]
fn int_set_is_terminated_by_minus_one() {
    let (mut tx, rx) = pair();
    tx.send(&vec![5i32, 6]).unwrap();

    let mut raw = rx.into_inner();
    let mut bytes = [0u8; 12];
    raw.read_exact(&mut bytes).unwrap();
    assert_eq!(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 5);
    assert_eq!(i32::from_ne_bytes(bytes[4..8].try_into().unwrap()), 6);
    assert_eq!(i32::from_ne_bytes(bytes[8..12].try_into().unwrap()), INT_SET_END);
}

#[test]
fn string_is_length_prefixed() {
    let (mut tx, rx) = pair();
    tx.send_str("abc").unwrap();

    let mut raw = rx.into_inner();
    let mut len = [0u8; size_of::<usize>()];
    raw.read_exact(&mut len).unwrap();
    assert_eq!(usize::from_ne_bytes(len), 3);
    let mut body = [0u8; 3];
    raw.read_exact(&mut body).unwrap();
    assert_eq!(&body, b"abc");
}

#[test]
fn commands_round_trip() {
    let cmds = vec![
        Command::Ping,
        Command::PlayPath("/music/a.flac".into()),
        Command::PlistAdd {
            items: vec!["x".into(), "y".into(), "z".into()],
            index: -1,
        },
        Command::PlistMove { from: 2, to: 0 },
        Command::SetFileTags {
            path: "/music/a.flac".into(),
            edit: TagEdit {
                title: Some("New".into()),
                ..TagEdit::default()
            },
        },
        Command::SetRating {
            path: "/music/a.flac".into(),
            rating: 4,
        },
        Command::Seek(-5),
        Command::ToggleShuffle,
    ];

    let (mut tx, mut rx) = pair();
    for c in &cmds {
        c.write(&mut tx).unwrap();
    }
    for c in &cmds {
        assert_eq!(&Command::read(&mut rx).unwrap(), c);
    }
}

#[test]
fn events_round_trip() {
    let events = vec![
        Event::Pong,
        Event::State(PlayState::Paused),
        Event::Song(None),
        Event::Song(Some("/music/b.ogg".into())),
        Event::PlistAdd {
            items: vec!["x".into()],
            index: 4,
        },
        Event::FileTags {
            path: "/music/b.ogg".into(),
            tags: FileTags::default(),
        },
        Event::Options(Options {
            shuffle: true,
            repeat: false,
            autonext: true,
        }),
        Event::StatusMsg("hello".into()),
    ];

    let (mut tx, mut rx) = pair();
    for e in &events {
        e.write(&mut tx).unwrap();
    }
    for e in &events {
        let opcode: i32 = rx.get().unwrap();
        assert_eq!(&Event::read_body(opcode, &mut rx).unwrap(), e);
    }
}

#[test]
fn unknown_opcode_is_a_protocol_error() {
    let (mut tx, mut rx) = pair();
    tx.send(&0x7777i32).unwrap();
    assert!(matches!(
        Command::read(&mut rx),
        Err(ProtocolError::UnknownCommand(0x7777))
    ));
}

#[test]
fn eof_during_get_is_an_error() {
    let (tx, mut rx) = pair();
    drop(tx);
    let err = rx.get::<i32>().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[test]
fn coalesced_fields_leave_in_one_write_and_match_plain_sends() {
    let mut plain = Channel::new(ScriptedTransport::default());
    plain.send(&1i32).unwrap();
    plain.send_str("two").unwrap();
    let plain = plain.into_inner();
    assert_eq!(plain.write_calls, 3);

    let mut coalesced = Channel::new(ScriptedTransport::default());
    coalesced.begin_coalesce();
    coalesced.send(&1i32).unwrap();
    coalesced.send_str("two").unwrap();
    assert_eq!(coalesced.get_ref().write_calls, 0);
    coalesced.end_coalesce().unwrap();
    let coalesced = coalesced.into_inner();

    assert_eq!(coalesced.write_calls, 1);
    assert_eq!(coalesced.written, plain.written);
}

#[test]
fn nested_coalesce_flushes_only_at_outermost_end() {
    let mut ch = Channel::new(ScriptedTransport::default());
    ch.begin_coalesce();
    ch.send(&1i32).unwrap();
    ch.begin_coalesce();
    ch.send(&2i32).unwrap();
    ch.end_coalesce().unwrap();
    assert_eq!(ch.get_ref().write_calls, 0);
    ch.end_coalesce().unwrap();
    assert_eq!(ch.get_ref().write_calls, 1);
    assert_eq!(ch.get_ref().written.len(), 8);
}

#[test]
fn coalesced_writes_from_another_thread_arrive_intact() {
    let (a, b) = UnixStream::pair().unwrap();
    let writer = std::thread::spawn(move || {
        let mut ch = Channel::new(a);
        ch.begin_coalesce();
        ch.send(&11i32).unwrap();
        ch.send_str("eleven").unwrap();
        ch.end_coalesce().unwrap();
    });
    let mut rx = Channel::new(b);
    assert_eq!(rx.get::<i32>().unwrap(), 11);
    assert_eq!(rx.get::<String>().unwrap(), "eleven");
    writer.join().unwrap();
}

fn queue_packet(ch: &mut Channel<ScriptedTransport>, bytes: &[u8]) {
    ch.begin_coalesce();
    ch.write_bytes(bytes).unwrap();
    ch.enqueue_as_packet();
}

#[test]
fn packets_arrive_in_order_despite_would_block() {
    let p1: Vec<u8> = (0..10).collect();
    let p2: Vec<u8> = (100..107).collect();
    let p3: Vec<u8> = (200..213).collect();

    let transport = ScriptedTransport {
        script: VecDeque::from(vec![
            None,
            Some(3),
            None,
            Some(4),
            None,
            None,
            Some(50),
            Some(1),
            None,
            Some(2),
            Some(5),
        ]),
        ..ScriptedTransport::default()
    };
    let mut ch = Channel::new(transport);
    queue_packet(&mut ch, &p1);
    queue_packet(&mut ch, &p2);
    queue_packet(&mut ch, &p3);
    assert_eq!(ch.queued_packets(), 3);

    let mut sent = 0;
    for _ in 0..100 {
        match ch.try_drain_one_packet().unwrap() {
            DrainStatus::Sent => sent += 1,
            DrainStatus::WouldBlock => {}
            DrainStatus::Idle => break,
        }
    }
    assert_eq!(sent, 3);
    assert!(!ch.has_packets());

    let expected: Vec<u8> = p1.iter().chain(&p2).chain(&p3).copied().collect();
    assert_eq!(ch.into_inner().written, expected);
}

#[test]
fn enqueue_does_not_touch_the_socket() {
    let mut ch = Channel::new(ScriptedTransport::default());
    Event::Pong.enqueue(&mut ch).unwrap();
    assert_eq!(ch.get_ref().write_calls, 0);
    assert_eq!(ch.drain_packets().unwrap(), 1);
    assert_eq!(ch.get_ref().written, crate::protocol::ev_op::PONG.to_ne_bytes());
}

#[test]
fn drain_reports_idle_on_empty_queue() {
    let mut ch = Channel::new(ScriptedTransport::default());
    assert_eq!(ch.try_drain_one_packet().unwrap(), DrainStatus::Idle);
}

#[test]
fn failed_write_is_surfaced() {
    struct Broken;
    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }
    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl Transport for Broken {
        fn wait_readable(&self, _: Option<std::time::Duration>) -> std::io::Result<bool> {
            Ok(true)
        }
        fn wait_writable(&self) -> std::io::Result<()> {
            Ok(())
        }
        fn available(&self) -> std::io::Result<usize> {
            Ok(0)
        }
        fn readable_now(&self) -> std::io::Result<bool> {
            Ok(true)
        }
    }

    let mut ch = Channel::new(Broken);
    Event::Pong.enqueue(&mut ch).unwrap();
    let err = ch.try_drain_one_packet().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    assert!(ch.has_packets());
}

#[test]
fn nonblocking_int_is_never_partially_consumed() {
    let (mut raw_tx, rx) = UnixStream::pair().unwrap();
    let mut rx = Channel::new(rx);
    let bytes = 0x0a0b0c0di32.to_ne_bytes();

    assert_eq!(rx.try_get_int_nonblocking().unwrap(), None);
    for (i, b) in bytes.iter().enumerate() {
        raw_tx.write_all(&[*b]).unwrap();
        if i < 3 {
            assert_eq!(rx.try_get_int_nonblocking().unwrap(), None);
            assert_eq!(rx.get_ref().available().unwrap(), i + 1);
        }
    }
    assert_eq!(rx.try_get_int_nonblocking().unwrap(), Some(0x0a0b0c0d));
    assert_eq!(rx.get_ref().available().unwrap(), 0);
}

#[test]
fn nonblocking_int_reports_hangup() {
    let (raw_tx, rx) = UnixStream::pair().unwrap();
    let mut rx = Channel::new(rx);
    drop(raw_tx);
    let err = rx.try_get_int_nonblocking().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
