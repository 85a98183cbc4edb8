use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use time::macros::format_description;
use time::OffsetDateTime;

use super::board_mapping::{BoardMapping, SiPMWiring};
use super::calibration::CalibrationStore;
use super::channel_map::ChannelMap;
use super::cluster::make_clusters;
use super::config::Config;
use super::constants::BAD_FIT_CHI2;
use super::digitizer::Digitizer;
use super::error::ProcessorError;
use super::raw_source::{CsvRawSource, RawHitSource};
use super::worker_status::WorkerStatus;
use super::writer::DigiWriter;

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events_processed: u64,
    pub scifi_hits: u64,
    pub mufilter_hits: u64,
    pub clusters: u64,
    pub stopped_early: bool,
}

/// Load the calibration store described by the config
pub fn load_calibration(config: &Config) -> Result<CalibrationStore, ProcessorError> {
    let (charge_path, time_path) = config.get_calibration_tables()?;
    Ok(CalibrationStore::read(&charge_path, &time_path)?.with_gain(config.charge_gain))
}

/// Load the board mapping and SiPM wiring described by the config
pub fn load_channel_map(config: &Config) -> Result<ChannelMap, ProcessorError> {
    let mapping = BoardMapping::read(&config.get_board_mapping()?, config.mapping_format)?;
    let wiring = SiPMWiring::read(&config.get_sipm_map_directory()?)?;
    Ok(ChannelMap::new(&mapping, wiring)?)
}

/// Fit quality overview of the calibration tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationSummary {
    pub n_channels: usize,
    pub n_missing_time: usize,
    pub n_bad_charge: usize,
    pub n_bad_time: usize,
    pub n_over_cut: usize,
    pub worst_charge: f64,
    pub worst_time: f64,
}

/// Summarize the calibration report: unusable fits (ndof < 2), fits over the chi2 cut and
/// the worst chi2/ndof seen for each table.
pub fn calibration_summary(config: &Config) -> Result<CalibrationSummary, ProcessorError> {
    let calibration = load_calibration(config)?;
    let mut summary = CalibrationSummary::default();
    for (charge, time) in calibration.report().into_values() {
        summary.n_channels += 1;
        if time < 0.0 {
            summary.n_missing_time += 1;
        }
        if charge == BAD_FIT_CHI2 {
            summary.n_bad_charge += 1;
        } else {
            summary.worst_charge = summary.worst_charge.max(charge);
        }
        if time == BAD_FIT_CHI2 {
            summary.n_bad_time += 1;
        } else {
            summary.worst_time = summary.worst_time.max(time);
        }
        if charge.max(time) > config.chi2_max {
            summary.n_over_cut += 1;
        }
    }
    Ok(summary)
}

fn local_time() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

/// Digitize every event of a source and write the results.
///
/// The stop flag is checked between events; the event in flight is always finished.
pub fn digitize_events<S: RawHitSource>(
    config: &Config,
    digitizer: &Digitizer<'_, CalibrationStore>,
    source: &mut S,
    writer: &mut DigiWriter,
    n_total: u64,
    tx: &Sender<WorkerStatus>,
    stop: &AtomicBool,
) -> Result<RunSummary, ProcessorError> {
    let mut summary = RunSummary::default();
    let flush_frac: f32 = 0.01;
    let flush_val = ((n_total as f64 * flush_frac as f64) as u64).max(1);
    let mut count = 0;

    while let Some(raw_event) = source.next_event()? {
        if stop.load(Ordering::Relaxed) {
            log::warn!("Stop requested; ending run {} early", config.run_number);
            summary.stopped_early = true;
            break;
        }
        if raw_event.event_number < config.first_event {
            continue;
        }
        if !config.is_event_selected(raw_event.event_number, summary.events_processed) {
            break;
        }

        if config.is_heartbeat_valid() && raw_event.event_number % config.heartbeat == 0 {
            log::info!(
                "run {} event {} local time {}",
                config.run_number,
                raw_event.event_number,
                local_time()
            );
        }
        log::debug!(
            "event: {} timestamp: {} hits: {}",
            raw_event.event_number,
            raw_event.timestamp,
            raw_event.n_hits()
        );

        let mut event = digitizer.process_event(&raw_event);
        if config.make_clusters {
            let clusters = make_clusters(&event.scifi);
            summary.clusters += clusters.len() as u64;
            event.clusters = Some(clusters);
        }
        summary.scifi_hits += event.scifi.len() as u64;
        summary.mufilter_hits += event.mufilter.len() as u64;
        writer.write_event(&event)?;
        summary.events_processed += 1;

        count += 1;
        if count >= flush_val {
            count = 0;
            tx.send(WorkerStatus::new(
                (summary.events_processed as f32 / n_total.max(1) as f32).min(1.0),
                config.run_number,
                summary.events_processed,
            ))?;
        }
    }
    Ok(summary)
}

/// The main loop of snd_digi.
///
/// Loads calibration and mapping once, then digitizes the run event by event. Anything
/// missing at startup is fatal; problems with single hits are only logged.
pub fn process_run(
    config: &Config,
    tx: &Sender<WorkerStatus>,
    stop: &AtomicBool,
) -> Result<RunSummary, ProcessorError> {
    let raw_path = config.get_raw_directory()?;
    let (digi_path, cluster_path) = config.get_output_files()?;

    log::info!("Loading calibration from {}...", config.calibration_path.to_string_lossy());
    let calibration = load_calibration(config)?;
    log::info!("Loading board mapping...");
    let channel_map = load_channel_map(config)?;

    let mut source = CsvRawSource::new(&raw_path)?;
    log::info!(
        "Total raw data size: {} in {} events",
        human_bytes::human_bytes(source.total_size_bytes as f64),
        source.n_events()
    );
    let n_total = match config.n_events {
        Some(n) => n.min(source.n_events() as u64),
        None => source.n_events() as u64,
    };

    let digitizer = Digitizer::new(
        &calibration,
        &channel_map,
        config.quality_cuts(),
        config.run_number,
    );
    let mut writer = DigiWriter::new(&digi_path, cluster_path.as_deref())?;

    tx.send(WorkerStatus::new(0.0, config.run_number, 0))?;
    let summary = digitize_events(
        config,
        &digitizer,
        &mut source,
        &mut writer,
        n_total,
        tx,
        stop,
    )?;
    writer.close()?;
    tx.send(WorkerStatus::new(
        1.0,
        config.run_number,
        summary.events_processed,
    ))?;

    log::info!(
        "Processed {} events: {} SciFi hits, {} MuFilter hits, {} clusters",
        summary.events_processed,
        summary.scifi_hits,
        summary.mufilter_hits,
        summary.clusters
    );
    log::info!("Output written to {}", digi_path.to_string_lossy());
    Ok(summary)
}
