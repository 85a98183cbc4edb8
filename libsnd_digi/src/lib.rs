//! # snd_digi
//!
//! snd_digi is the SND@LHC raw data digitizer, written in Rust. It takes the tofpet
//! readings recorded by the SND@LHC data acquisition, calibrates them, attaches them to
//! the detector elements of the SciFi tracker and the Muon Filter (Veto, Upstream and
//! Downstream planes) and writes one digitized event per triggered event.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./snd_digi_cli` from the top
//! level repository. The binary will be installed to your cargo install location
//! (typically something like `~/.cargo/bin/`).
//!
//! ## Configuration
//!
//! A run is described by a YAML configuration file. A template can be generated with
//! `snd_digi_cli -p config.yml new`. The format is as follows:
//!
//! ```yml
//! raw_data_path: None
//! calibration_path: None
//! sipm_map_path: None
//! output_path: None
//! mapping_format: Json
//! run_number: 0
//! first_event: 0
//! n_events: null
//! heartbeat: 10000
//! chi2_max: 2000.0
//! saturation_limit: 0.95
//! charge_gain: 1.0
//! make_clusters: false
//! debug: false
//! ```
//!
//! - raw_data_path: Directory holding the raw data of the run (see below)
//! - calibration_path: Directory holding `qdc_cal.csv`, `tdc_cal.csv` and the board mapping
//! - sipm_map_path: Directory holding `Veto_SiPM_mapping.csv`, `US_SiPM_mapping.csv` and
//! `DS_SiPM_mapping.csv`
//! - output_path: Directory to which the digitized data is written
//! - mapping_format: `Json` reads `board_mapping.json`, `Legacy` reads `board_mapping.csv`
//! - first_event/n_events: Event window. `n_events: null` processes everything
//! - heartbeat: Log a progress line every this many events. 0 disables it
//! - chi2_max/saturation_limit: Quality cuts. Hits failing them are kept but flagged invalid
//! - charge_gain: Divisor applied to every calibrated charge
//! - make_clusters: Group neighbouring SciFi hits and write them to a cluster file
//! - debug: Log per-hit diagnostics (missing calibrations, non-finite charges). Optional,
//! defaults to false
//!
//! A run always covers the whole event window from the CLI. Library callers can stop
//! [`process::process_run`] between events through its stop flag.
//!
//! ### Calibration Tables
//!
//! Both tables are CSV with a header line. Charge (QDC) rows are
//!
//! ```csv
//! board,tofpet,channel,tac,a,b,c,chi2,d,ndof,e
//! ```
//!
//! and time (TDC) rows are
//!
//! ```csv
//! board,tofpet,channel,tac,tdc,a,b,c,chi2,d,ndof
//! ```
//!
//! Rows with too few columns are skipped. A fit with fewer than two degrees of freedom
//! is given a chi2/ndof of 999999.
//!
//! ### Board Mapping
//!
//! The JSON mapping has two sections:
//!
//! ```json
//! {"Scifi": {"board_11": {"M1Y": 0}}, "MuFilter": {"board_1": {"A": "Veto_1Left"}}}
//! ```
//!
//! SciFi boards map station names to a mat, MuFilter boards map the slot letter (A-D, two
//! tofpets each) to a plane name. The legacy CSV flavour holds the same information as
//! `system,board,key,value` rows.
//!
//! ### Raw Data
//!
//! The raw data directory contains `events.csv` (`event,timestamp`) and one
//! `board_<id>.csv` per readout board
//! (`event,tofpet_id,tofpet_channel,tac,t_coarse,t_fine,v_coarse,v_fine`).
//!
//! ## Output
//!
//! `run_<NNNNNN>_digi.csv` holds one row per filled detector slot:
//!
//! ```csv
//! event,detector,detector_id,slot,charge,time,valid,unmapped
//! ```
//!
//! `unmapped` is 1 for MuFilter slots addressed through the sentinel SiPM channel (99) because
//! the wiring key was unknown. Such slots are also marked invalid and never replace a slot
//! filled by a properly mapped hit.
//!
//! If clustering is enabled, `run_<NNNNNN>_clusters.csv` holds `event,first,n` rows.
//! Rejected hits keep a diagnostic charge: the charge made negative for bad fits (-997 for
//! an infinite charge, -998 for NaN), and `A + B/1000` (A = clamped charge, B = clamped
//! saturation) for saturated or undefined charges.
pub mod board_mapping;
pub mod calibration;
pub mod channel_map;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod digi_hit;
pub mod digitizer;
pub mod error;
pub mod hardware_id;
pub mod process;
pub mod quality;
pub mod raw_source;
pub mod worker_status;
pub mod writer;
