use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::channel;

use libsnd_digi::config::Config;
use libsnd_digi::process::{calibration_summary, process_run};

fn make_template_config(path: &Path) -> Result<(), String> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).map_err(|e| e.to_string())?;
    let mut file = File::create(path).map_err(|e| e.to_string())?;
    file.write_all(yaml_str.as_bytes())
        .map_err(|e| e.to_string())
}

fn report(config: &Config) {
    match calibration_summary(config) {
        Ok(summary) => {
            log::info!("Calibrated channels: {}", summary.n_channels);
            log::info!("Channels without time fit: {}", summary.n_missing_time);
            log::info!(
                "Unusable fits (ndof < 2): charge {} time {}",
                summary.n_bad_charge,
                summary.n_bad_time
            );
            log::info!(
                "Channels over chi2 cut {}: {}",
                config.chi2_max,
                summary.n_over_cut
            );
            log::info!(
                "Worst chi2/ndof: charge {} time {}",
                summary.worst_charge,
                summary.worst_time
            );
        }
        Err(e) => log::error!("Calibration report failed with error: {e}"),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("snd_digi_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("report").about("Summarize the calibration fit quality"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback. The terminal logger accepts debug output; the global level
    // starts at info and is raised once the config asks for it
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }
    log::set_max_level(simplelog::LevelFilter::Info);

    let Some(path) = matches.get_one::<String>("path") else {
        log::error!("A configuration path is required");
        return;
    };
    let config_path = PathBuf::from(path);

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Could not write template config: {e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::set_max_level(config.log_level());

    if let Some(("report", _)) = matches.subcommand() {
        report(&config);
        return;
    }

    log::info!("Raw Data Path: {}", config.raw_data_path.to_string_lossy());
    log::info!(
        "Calibration Path: {}",
        config.calibration_path.to_string_lossy()
    );
    log::info!("SiPM Map Path: {}", config.sipm_map_path.to_string_lossy());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Run: {}", config.run_number);
    match config.n_events {
        Some(n) => log::info!("Events: {} from event {}", n, config.first_event),
        None => log::info!("Events: all from event {}", config.first_event),
    }

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let (tx, rx) = channel();
    // Spawn the task! Stopping early is only available to library callers of process_run
    let handle =
        std::thread::spawn(move || process_run(&config, &tx, &AtomicBool::new(false)));

    // The channel closes once the worker drops its sender
    for status in rx.iter() {
        pb.set_position((status.progress * 100.0) as u64);
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(summary) if summary.stopped_early => {
                log::warn!(
                    "Digitization stopped after {} events",
                    summary.events_processed
                )
            }
            Ok(_) => log::info!("Successfully digitized data!"),
            Err(e) => log::error!("Digitization failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join digitization task!"),
    }

    pb.finish();

    log::info!("Done.");
}
