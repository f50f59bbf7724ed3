use super::*;
use std::io::Write;
use crate::CLIENTS_MAX;
use crate::audio::{AudioSink, NullSink, PlayState};
use crate::client::Connection;
use crate::poll::wait_fd;
use crate::protocol::Command;
use tempfile::{TempDir, tempdir};

fn null_factory() -> SinkFactory {
    Box::new(|| -> Result<Box<dyn AudioSink>, ServerError> { Ok(Box::new(NullSink::new())) })
}

fn settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.server.socket_path = dir.path().join("run").join("prestod.sock");
    settings.server.mpris = false;
    settings.cache.enabled = false;
    settings
}

fn server(dir: &TempDir) -> Server {
    Server::start(&settings(dir), DecoderRegistry::new(), null_factory()).unwrap()
}

/// Attach one end of a socket pair as a client of `core`.
fn attach(core: &Core) -> (usize, Connection) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    ours.set_nonblocking(true).unwrap();
    let client = core.registry.add(ours).unwrap();
    (client, Connection::from_stream(theirs))
}

#[test]
fn registry_hands_the_stream_back_when_full() {
    let registry = ClientRegistry::new().unwrap();
    let mut peers = Vec::new();
    for expected in 0..CLIENTS_MAX {
        let (ours, theirs) = UnixStream::pair().unwrap();
        assert_eq!(registry.add(ours).ok(), Some(expected));
        peers.push(theirs);
    }
    let (extra, _peer) = UnixStream::pair().unwrap();
    assert!(matches!(registry.add(extra), Err(Refused::Full(_))));

    registry.remove(3);
    assert!(!registry.is_connected(3));
    let (again, _peer) = UnixStream::pair().unwrap();
    assert_eq!(registry.add(again).ok(), Some(3));
    assert_eq!(registry.connected().len(), CLIENTS_MAX);
}

#[test]
fn broadcast_queues_for_everyone_and_wakes_the_loop() {
    let registry = ClientRegistry::new().unwrap();
    let mut conns = Vec::new();
    for _ in 0..2 {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let client = registry.add(ours).unwrap();
        conns.push((client, Connection::from_stream(theirs)));
    }

    registry.broadcast(&Event::MixerChange(55));
    assert!(wait_fd(registry.wake_fd(), Interest::Read, Some(Duration::from_secs(1))).unwrap());
    registry.clear_wake();

    for (client, conn) in &mut conns {
        assert!(registry.has_pending(*client));
        assert_eq!(registry.flush(*client).unwrap(), 1);
        assert!(!registry.has_pending(*client));
        assert_eq!(conn.next_event().unwrap(), Event::MixerChange(55));
    }
}

#[test]
fn half_sent_command_does_not_hold_up_broadcasts() {
    let registry = Arc::new(ClientRegistry::new().unwrap());
    let (ours, mut theirs) = UnixStream::pair().unwrap();
    ours.set_nonblocking(true).unwrap();
    let client = registry.add(ours).unwrap();

    // Opcode only; the index never follows.
    theirs
        .write_all(&crate::protocol::cmd_op::PLIST_DEL.to_ne_bytes())
        .unwrap();
    let reader = {
        let registry = Arc::clone(&registry);
        std::thread::spawn(move || registry.read_command(client))
    };
    std::thread::sleep(Duration::from_millis(100));

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    {
        let registry = Arc::clone(&registry);
        std::thread::spawn(move || {
            registry.broadcast(&Event::Ctime(1));
            let _ = done_tx.send(());
        });
    }
    done_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("broadcast blocked behind the reader");
    assert!(registry.has_pending(client));

    let started = Instant::now();
    let err = reader.join().unwrap().unwrap_err();
    assert!(!err.is_disconnect());
    assert!(started.elapsed() < COMMAND_STALL + Duration::from_secs(1));
}

#[test]
fn send_to_only_reaches_one_client() {
    let registry = ClientRegistry::new().unwrap();
    let (a, _pa) = UnixStream::pair().unwrap();
    let (b, _pb) = UnixStream::pair().unwrap();
    let a = registry.add(a).unwrap();
    let b = registry.add(b).unwrap();

    registry.send_to(b, &Event::Pong);
    assert!(!registry.has_pending(a));
    assert!(registry.has_pending(b));
}

#[test]
fn start_refuses_a_live_socket_and_clears_a_stale_one() {
    let dir = tempdir().unwrap();
    let settings = settings(&dir);
    let path = settings.server.socket_path.clone();
    fs::create_dir_all(path.parent().unwrap()).unwrap();

    let live = UnixListener::bind(&path).unwrap();
    let err = Server::start(&settings, DecoderRegistry::new(), null_factory()).err();
    assert!(matches!(err, Some(ServerError::AlreadyRunning(_))));
    drop(live);

    // The file outlives the listener: a stale socket.
    assert!(path.exists());
    let server = Server::start(&settings, DecoderRegistry::new(), null_factory()).unwrap();
    assert_eq!(server.socket_path(), path);
    drop(server);
    assert!(!path.exists());
}

#[test]
fn ping_is_answered_to_the_sender_only() {
    let dir = tempdir().unwrap();
    let server = server(&dir);
    let core = server.core();
    let (a, mut conn) = attach(&core);
    let (b, _other) = attach(&core);

    assert_eq!(core.dispatch(a, Command::Ping), Flow::Continue);
    assert!(!core.registry.has_pending(b));
    core.registry.flush(a).unwrap();
    assert_eq!(conn.next_event().unwrap(), Event::Pong);
}

#[test]
fn playlist_edits_are_broadcast() {
    let dir = tempdir().unwrap();
    let server = server(&dir);
    let core = server.core();
    let (a, mut first) = attach(&core);
    let (b, mut second) = attach(&core);

    let items = vec!["/m/a.mp3".to_string(), "/m/b.mp3".to_string()];
    core.dispatch(
        a,
        Command::PlistAdd {
            items: items.clone(),
            index: -1,
        },
    );
    core.dispatch(a, Command::PlistMove { from: 0, to: 1 });
    for client in [a, b] {
        core.registry.flush(client).unwrap();
    }

    for conn in [&mut first, &mut second] {
        assert_eq!(
            conn.next_event().unwrap(),
            Event::PlistAdd {
                items: items.clone(),
                index: 0
            }
        );
        assert_eq!(conn.next_event().unwrap(), Event::PlistMove { from: 0, to: 1 });
    }

    core.dispatch(b, Command::PlistGet);
    core.registry.flush(b).unwrap();
    let listed: Vec<String> = second.reply().unwrap();
    assert_eq!(listed, ["/m/b.mp3", "/m/a.mp3"]);
}

#[test]
fn out_of_range_edits_are_silent() {
    let dir = tempdir().unwrap();
    let server = server(&dir);
    let core = server.core();
    let (a, _conn) = attach(&core);

    core.dispatch(a, Command::PlistDel(4));
    core.dispatch(a, Command::PlistDel(-1));
    core.dispatch(a, Command::PlistMove { from: 0, to: 9 });
    assert!(!core.registry.has_pending(a));
}

#[test]
fn option_toggles_are_broadcast() {
    let dir = tempdir().unwrap();
    let server = server(&dir);
    let core = server.core();
    let (a, _first) = attach(&core);
    let (b, mut second) = attach(&core);

    core.dispatch(a, Command::ToggleShuffle);
    core.registry.flush(b).unwrap();
    match second.next_event().unwrap() {
        Event::Options(options) => assert!(options.shuffle),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn status_map_reports_a_stopped_server() {
    let dir = tempdir().unwrap();
    let server = server(&dir);
    let core = server.core();
    let (a, mut conn) = attach(&core);

    core.dispatch(a, Command::GetState);
    core.registry.flush(a).unwrap();
    let state: i32 = conn.reply().unwrap();
    assert_eq!(state, PlayState::Stopped.to_wire());

    let status = core.status_map();
    assert_eq!(status.get("state").map(String::as_str), Some("stopped"));
    assert!(!status.contains_key("file"));
}

#[test]
fn quit_and_disconnect_end_the_session() {
    let dir = tempdir().unwrap();
    let server = server(&dir);
    let core = server.core();
    let (a, _conn) = attach(&core);

    assert_eq!(core.dispatch(a, Command::Disconnect), Flow::Disconnect);
    assert_eq!(core.dispatch(a, Command::Quit), Flow::Quit);

    assert!(!core.quit_requested());
    core.control(ControlCmd::Quit);
    assert!(core.quit_requested());
}

#[test]
fn run_stops_on_quit_and_removes_the_socket() {
    let dir = tempdir().unwrap();
    let mut server = server(&dir);
    let path = server.socket_path().to_path_buf();
    let handle = std::thread::spawn(move || server.run());

    let mut conn = Connection::connect(&path).unwrap();
    conn.ping().unwrap();
    conn.send(&Command::Quit).unwrap();
    assert_eq!(conn.next_event().unwrap(), Event::Exit);

    handle.join().unwrap().unwrap();
    assert!(!path.exists());
}
