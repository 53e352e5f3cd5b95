use clap::{App, Arg};
use log::{error, info, LevelFilter};
use seedlink::acquisition::Acquisition;
use seedlink::config::{Config, DEFAULT_CONFIG_FILE, SOFTWARE_ID};
use seedlink::connection::ConnectionContext;
use seedlink::lockfile::LockFile;
use seedlink::server::Server;
use seedlink::signals;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
///
/// This holds the command line options:
///
#[derive(Debug, Clone)]
struct ProgramOptions {
    config_file: PathBuf,
    verbosity: u64,
    log_filename: Option<String>,
}

fn main() {
    let options = process_options();
    setup_logging(&options);
    info!("{} starting", SOFTWARE_ID);

    let config = match Config::load(&options.config_file) {
        Ok(c) => c,
        Err(e) => fail(&format!("{}: {}", options.config_file.display(), e)),
    };

    // Held until we exit:
    let _lock = config.lockfile().map(|path| match LockFile::acquire(&path) {
        Ok(lock) => lock,
        Err(e) => fail(&format!("{}: {}", path.display(), e)),
    });

    let stop = signals::install();

    let master = match config.master_monitor() {
        Ok(m) => m,
        Err(e) => fail(&e.to_string()),
    };
    let (registry, stations) = match config.build_stations() {
        Ok(s) => s,
        Err(e) => fail(&e.to_string()),
    };
    if let Err(e) = registry.restore_state() {
        fail(&format!("cannot restore station state: {}", e));
    }
    info!("{} stations configured", registry.len());

    let context = ConnectionContext {
        master: Rc::new(master),
        stations: Rc::new(registry),
        default_network: config.server.network.clone(),
        request_log: config.server.request_log,
    };
    let mut server = match Server::bind(config.server_settings(), context) {
        Ok(s) => s,
        Err(e) => fail(&e.to_string()),
    };

    let mut acquisition = Acquisition::new(config.plugin_params(), stations);
    acquisition.start();

    if let Err(e) = server.run(&mut acquisition, &stop) {
        fail(&e.to_string());
    }
    info!("server stopped");
}
///
/// Log a fatal startup error, tell the user and exit.
///
fn fail(message: &str) -> ! {
    error!("{}", message);
    eprintln!("seedlink: {}", message);
    process::exit(1);
}

fn setup_logging(options: &ProgramOptions) {
    let level = match options.verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    match &options.log_filename {
        Some(file) => {
            if let Err(e) = simple_logging::log_to_file(file, level) {
                eprintln!("Unable to open/create log file {} : {}", file, e);
                process::exit(-1);
            }
        }
        None => simple_logging::log_to_stderr(level),
    }
}
///
/// Argument processing.  We do this with clap.  The options we
/// support are:
///
/// *   --config-file - The TOML configuration file.
/// *   -v            - Once per step of log detail.
/// *   --verbosity   - The same as a number; wins over -v.
/// *   --log-file    - The file we'll log to instead of stderr.
///
fn process_options() -> ProgramOptions {
    let parser = App::new("seedlink")
        .version(env!("CARGO_PKG_VERSION"))
        .about("SeedLink real-time seismic data server")
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config-file")
                .value_name("PATH")
                .help("Configuration file")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Increase log verbosity (repeatable)"),
        )
        .arg(
            Arg::with_name("verbosity")
                .long("verbosity")
                .value_name("LEVEL")
                .help("Log verbosity: 0 warnings, 1 info, 2 debug, 3 trace")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log-file")
                .value_name("PATH")
                .help("File used to log events")
                .takes_value(true),
        )
        .get_matches();

    let mut result = ProgramOptions {
        config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
        verbosity: parser.occurrences_of("verbose"),
        log_filename: None,
    };

    if let Some(file) = parser.value_of("config") {
        if fs::metadata(file).is_err() {
            eprintln!("The value of --config-file must be an existing file, was {}", file);
            process::exit(-1);
        }
        result.config_file = PathBuf::from(file);
    }

    if let Some(level) = parser.value_of("verbosity") {
        if let Ok(value) = level.parse::<u64>() {
            result.verbosity = value;
        } else {
            eprintln!("The value of --verbosity must be an unsigned integer");
            process::exit(-1);
        }
    }

    if let Some(file) = parser.value_of("log") {
        result.log_filename = Some(String::from(file));
    }

    result
}
