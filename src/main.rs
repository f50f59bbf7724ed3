use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use prestod::audio::backend_factory;
use prestod::config::{Settings, resolve_config_path};
use prestod::decoder::DecoderRegistry;
use prestod::server::Server;
use prestod::{logging, mpris};

const USAGE: &str = "usage: prestod [-v] [-f|--foreground] [--config FILE] [--print-config]";

#[derive(Debug, Default)]
struct Args {
    verbose: bool,
    foreground: bool,
    print_config: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-v" | "--verbose" => args.verbose = true,
            "-f" | "--foreground" => args.foreground = true,
            "--print-config" => args.print_config = true,
            "--config" => {
                let path = it.next().ok_or("--config needs a file")?;
                args.config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument `{other}`\n{USAGE}")),
        }
    }
    Ok(args)
}

/// Settings from `--config` or the usual places; defaults when they are
/// unusable.
fn load_settings(explicit: Option<PathBuf>) -> Settings {
    let path = explicit.or_else(resolve_config_path);
    let loaded = Settings::load_from(path.clone())
        .map_err(|e| e.to_string())
        .and_then(|s| s.validate().map(|()| s));
    match loaded {
        Ok(settings) => settings,
        Err(e) => {
            let from = path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "environment".to_string());
            log::warn!("invalid configuration ({from}): {e}; using defaults");
            Settings::default()
        }
    }
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };

    if args.print_config {
        let settings = load_settings(args.config);
        return match settings.to_toml() {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("prestod: cannot render settings: {e}");
                ExitCode::FAILURE
            }
        };
    }

    logging::init(args.verbose, args.foreground);
    let settings = load_settings(args.config);

    let decoders = DecoderRegistry::with_defaults(&settings.library.extensions);
    let sink = backend_factory(settings.audio.backends.clone());
    let mut server = match Server::start(&settings, decoders, sink) {
        Ok(server) => server,
        Err(e) => {
            log::error!("{e}");
            eprintln!("prestod: {e}");
            return ExitCode::FAILURE;
        }
    };

    if settings.server.mpris
        && let Err(e) = mpris::spawn_mpris(server.core())
    {
        log::warn!("{e}");
    }

    match server.run() {
        Ok(()) => {
            log::info!("bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
