//! Command-line remote for a running prestod.

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use prestod::client::{ClientError, Connection};
use prestod::config::Settings;
use prestod::protocol::{Command, Event};

const USAGE: &str = "\
usage: prestoctl [--socket PATH] COMMAND [ARGS]

commands:
  ping                     check the server is alive
  play [PATH|INDEX]        play a file, a playlist entry, or from the top
  stop | pause | unpause | next | prev
  seek [+|-]SECS           seek relative to the current position
  add PATH...              append files to the playlist
  clear                    empty the playlist
  list                     print the playlist
  status                   print what is playing
  tags PATH                print a file's tags
  shuffle | repeat | autonext
                           toggle a playback option
  volume [LEVEL]           print or set the volume (0-100)
  rating PATH STARS        rate a file (0-5)
  watch                    print events as they arrive
  quit                     stop the server";

fn absolute(path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    let p = Path::new(path);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        env::current_dir().map(|d| d.join(p)).unwrap_or_else(|_| p.to_path_buf())
    };
    abs.canonicalize()
        .unwrap_or(abs)
        .to_string_lossy()
        .into_owned()
}

fn parse_int(s: &str, what: &str) -> Result<i32, String> {
    s.trim_start_matches('+')
        .parse()
        .map_err(|_| format!("{what} must be a number, got `{s}`"))
}

fn arg<'a>(rest: &'a [String], i: usize, cmd: &str, what: &str) -> Result<&'a str, String> {
    rest.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("{cmd}: missing {what}"))
}

fn describe(ev: &Event) -> String {
    match ev {
        Event::State(s) => format!("state {}", s.as_str()),
        Event::Ctime(t) => format!("time {t}"),
        Event::Song(Some(path)) => format!("song {path}"),
        Event::Song(None) => "song -".to_string(),
        Event::PlistAdd { items, index } => format!("playlist +{} at {index}", items.len()),
        Event::PlistDel(i) => format!("playlist -{i}"),
        Event::PlistMove { from, to } => format!("playlist {from} -> {to}"),
        Event::PlistClear => "playlist cleared".to_string(),
        Event::FileRating { path, rating } => format!("rating {rating} {path}"),
        Event::MixerChange(v) => format!("volume {v}"),
        Event::Options(o) => format!(
            "options shuffle={} repeat={} autonext={}",
            o.shuffle, o.repeat, o.autonext
        ),
        Event::SrvError(msg) => format!("error: {msg}"),
        Event::StatusMsg(msg) => format!("status: {msg}"),
        other => format!("{other:?}"),
    }
}

fn watch(conn: &mut Connection) -> Result<(), ClientError> {
    loop {
        match conn.poll_event()? {
            Some(Event::Exit) => {
                println!("server exited");
                return Ok(());
            }
            Some(ev) => println!("{}", describe(&ev)),
            None => thread::sleep(Duration::from_millis(50)),
        }
    }
}

fn run(socket: &Path, cmd: &str, rest: &[String]) -> Result<(), String> {
    let mut conn = Connection::connect(socket).map_err(|e| e.to_string())?;
    let err = |e: ClientError| e.to_string();

    match cmd {
        "ping" => {
            conn.ping().map_err(err)?;
            println!("pong");
        }
        "play" => {
            let command = match rest.first() {
                None => Command::PlayIndex(-1),
                Some(a) => match a.parse::<i32>() {
                    Ok(i) => Command::PlayIndex(i),
                    Err(_) => Command::PlayPath(absolute(a)),
                },
            };
            conn.send(&command).map_err(err)?;
        }
        "stop" => conn.send(&Command::Stop).map_err(err)?,
        "pause" => conn.send(&Command::Pause).map_err(err)?,
        "unpause" => conn.send(&Command::Unpause).map_err(err)?,
        "next" => conn.send(&Command::Next).map_err(err)?,
        "prev" => conn.send(&Command::Prev).map_err(err)?,
        "seek" => {
            let delta = parse_int(arg(rest, 0, cmd, "seconds")?, "seconds")?;
            conn.send(&Command::Seek(delta)).map_err(err)?;
        }
        "add" => {
            if rest.is_empty() {
                return Err("add: nothing to add".to_string());
            }
            let items = rest.iter().map(|p| absolute(p)).collect();
            conn.send(&Command::PlistAdd { items, index: -1 })
                .map_err(err)?;
        }
        "clear" => conn.send(&Command::PlistClear).map_err(err)?,
        "list" => {
            for (i, path) in conn.playlist().map_err(err)?.iter().enumerate() {
                println!("{i:>4}  {path}");
            }
        }
        "status" => {
            for (key, value) in conn.status().map_err(err)? {
                println!("{key}: {value}");
            }
        }
        "tags" => {
            let path = absolute(arg(rest, 0, cmd, "path")?);
            conn.send(&Command::GetFileTags(path.clone())).map_err(err)?;
            loop {
                match conn.next_event().map_err(err)? {
                    Event::FileTags { path: p, tags } if p == path => {
                        println!("{tags:#?}");
                        break;
                    }
                    Event::StatusMsg(msg) => return Err(msg),
                    _ => {}
                }
            }
        }
        "shuffle" => conn.send(&Command::ToggleShuffle).map_err(err)?,
        "repeat" => conn.send(&Command::ToggleRepeat).map_err(err)?,
        "autonext" => conn.send(&Command::ToggleAutonext).map_err(err)?,
        "volume" => match rest.first() {
            Some(level) => {
                let level = parse_int(level, "volume")?;
                conn.send(&Command::SetMixer(level)).map_err(err)?;
            }
            None => println!("{}", conn.get_int(&Command::GetMixer).map_err(err)?),
        },
        "rating" => {
            let path = absolute(arg(rest, 0, cmd, "path")?);
            let rating = parse_int(arg(rest, 1, cmd, "stars")?, "stars")?;
            if !(0..=5).contains(&rating) {
                return Err("rating: stars must be within 0..=5".to_string());
            }
            conn.send(&Command::SetRating { path, rating })
                .map_err(err)?;
        }
        "watch" => watch(&mut conn).map_err(err)?,
        "quit" => conn.send(&Command::Quit).map_err(err)?,
        other => return Err(format!("unknown command `{other}`\n{USAGE}")),
    }

    if cmd != "quit" && cmd != "watch" {
        conn.disconnect().map_err(err)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut socket: Option<PathBuf> = None;
    if args.first().map(String::as_str) == Some("--socket") {
        if args.len() < 2 {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
        socket = Some(PathBuf::from(args.remove(1)));
        args.remove(0);
    }
    let Some((cmd, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    if cmd == "-h" || cmd == "--help" {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    let socket = socket.unwrap_or_else(|| {
        Settings::load()
            .map(|s| s.server.socket_path)
            .unwrap_or_else(|_| Settings::default().server.socket_path)
    });

    match run(&socket, cmd, rest) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("prestoctl: {e}");
            ExitCode::FAILURE
        }
    }
}
