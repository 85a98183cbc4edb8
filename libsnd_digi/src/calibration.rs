// Calibration of the tofpet readings.
//
// Every physical channel (board, tofpet, channel, tac) carries two fits:
// - a charge (QDC) response, a softplus-like curve in the integration length
// - a time (TDC) response, a quadratic in the fine time (one fit per TDC slot)
// The raw readings are converted by inverting these curves. A channel with no
// fit gets an all-zero parameter set, which typically produces NaN/inf values
// that the quality classification later flags. The substitution is reported in
// `Calibrated::missing` so the caller can log it.
use std::collections::BTreeMap;
use std::path::Path;

use fxhash::FxHashMap;

use super::constants::*;
use super::error::CalibrationError;
use super::raw_source::RawHit;

/// Key of a charge (QDC) fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChargeKey {
    pub board_id: u16,
    pub tofpet_id: u8,
    pub channel: u8,
    pub tac: u8,
}

impl ChargeKey {
    pub fn new(board_id: u16, tofpet_id: u8, channel: u8, tac: u8) -> Self {
        Self {
            board_id,
            tofpet_id,
            channel,
            tac,
        }
    }

    pub fn with_tdc(&self, tdc: u8) -> TimeKey {
        TimeKey {
            board_id: self.board_id,
            tofpet_id: self.tofpet_id,
            channel: self.channel,
            tac: self.tac,
            tdc,
        }
    }
}

/// Key of a time (TDC) fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeKey {
    pub board_id: u16,
    pub tofpet_id: u8,
    pub channel: u8,
    pub tac: u8,
    pub tdc: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChargeParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub chi2_ndof: f64,
}

impl ChargeParams {
    /// Invert the charge response. `fine_time` is the calibrated fine time (timestamp - t_coarse)
    pub fn invert(&self, v_coarse: f64, v_fine: f64, fine_time: f64, gain: f64) -> f64 {
        let x = v_coarse - fine_time - self.e;
        let f = -self.c * (1.0 + (self.a * x.powi(2) - self.b * x).exp()).ln() + self.d;
        (v_fine - f) / gain
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub chi2_ndof: f64,
}

impl TimeParams {
    /// Solve t_fine = a x^2 + b x + c for x and add the offset d. Negative discriminants give NaN.
    pub fn invert(&self, t_fine: f64) -> f64 {
        let disc = self.b.powi(2) - 4.0 * self.a * (self.c - t_fine);
        (-self.b - disc.sqrt()) / (2.0 * self.a) + self.d
    }
}

/// Which fits were absent for a channel and replaced by zeros
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingCalibration {
    pub charge: bool,
    pub time: bool,
}

impl MissingCalibration {
    pub fn any(&self) -> bool {
        self.charge || self.time
    }
}

/// Result of running both calibrations on one raw hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibrated {
    pub timestamp: f64,
    pub charge: f64,
    pub chi2: f64,
    pub saturation: f64,
    pub missing: MissingCalibration,
}

/// Read-only access to calibration fits.
///
/// The provided methods implement the calibration math on top of the two lookups, so
/// a test double only needs to hand out parameters.
pub trait CalibrationLookup {
    fn charge_params(&self, key: &ChargeKey) -> Option<&ChargeParams>;
    fn time_params(&self, key: &TimeKey) -> Option<&TimeParams>;

    /// Divisor applied to the calibrated charge
    fn gain(&self) -> f64 {
        DEFAULT_CHARGE_GAIN
    }

    /// Calibrated timestamp in clock cycles
    fn invert_time(&self, key: &TimeKey, t_coarse: i64, t_fine: u16) -> f64 {
        let par = self.time_params(key).copied().unwrap_or_default();
        t_coarse as f64 + par.invert(t_fine as f64)
    }

    /// Calibrated charge, using the timestamp returned by [`CalibrationLookup::invert_time`]
    fn invert_charge(
        &self,
        key: &ChargeKey,
        v_coarse: u16,
        v_fine: u16,
        timestamp: f64,
        t_coarse: i64,
    ) -> f64 {
        let par = self.charge_params(key).copied().unwrap_or_default();
        par.invert(
            v_coarse as f64,
            v_fine as f64,
            timestamp - t_coarse as f64,
            self.gain(),
        )
    }

    /// Worst fit quality of the two calibrations
    fn chi2(&self, key: &ChargeKey, tdc: u8) -> f64 {
        let qdc = self.charge_params(key).map(|p| p.chi2_ndof).unwrap_or(0.0);
        let tdc = self
            .time_params(&key.with_tdc(tdc))
            .map(|p| p.chi2_ndof)
            .unwrap_or(0.0);
        qdc.max(tdc)
    }

    /// Fraction of the charge range used by the hit
    fn saturation(&self, key: &ChargeKey, v_fine: u16) -> f64 {
        let d = self.charge_params(key).map(|p| p.d).unwrap_or(0.0);
        v_fine as f64 / d
    }

    /// Run the full time + charge calibration for one hit
    fn calibrate(&self, board_id: u16, hit: &RawHit, tdc: u8) -> Calibrated {
        let key = ChargeKey::new(board_id, hit.tofpet_id, hit.tofpet_channel, hit.tac);
        let time_key = key.with_tdc(tdc);
        let missing = MissingCalibration {
            charge: self.charge_params(&key).is_none(),
            time: self.time_params(&time_key).is_none(),
        };
        let timestamp = self.invert_time(&time_key, hit.t_coarse, hit.t_fine);
        let charge = self.invert_charge(&key, hit.v_coarse, hit.v_fine, timestamp, hit.t_coarse);
        Calibrated {
            timestamp,
            charge,
            chi2: self.chi2(&key, tdc),
            saturation: self.saturation(&key, hit.v_fine),
            missing,
        }
    }
}

/// CalibrationStore holds the charge and time fits of every channel for a run.
///
/// It is loaded once from the `qdc_cal.csv` and `tdc_cal.csv` tables and never modified
/// afterwards.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    charge: FxHashMap<ChargeKey, ChargeParams>,
    time: FxHashMap<TimeKey, TimeParams>,
    gain: f64,
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self {
            charge: FxHashMap::default(),
            time: FxHashMap::default(),
            gain: DEFAULT_CHARGE_GAIN,
        }
    }
}

fn parse_row(line: &str, line_number: usize) -> Result<Vec<f64>, CalibrationError> {
    line.split_terminator(',')
        .map(|e| {
            e.trim()
                .parse::<f64>()
                .map_err(|source| CalibrationError::ParsingError {
                    line: line_number,
                    source,
                })
        })
        .collect()
}

fn chi2_ndof(sum_sq: f64, ndof: f64) -> f64 {
    if ndof < MIN_NDOF {
        BAD_FIT_CHI2
    } else {
        sum_sq / ndof
    }
}

impl CalibrationStore {
    /// Build a store from the contents of the charge and time tables
    pub fn load(charge_table: &str, time_table: &str) -> Result<Self, CalibrationError> {
        let mut store = Self::default();

        let mut lines = charge_table.lines().enumerate();
        if let Some((_, header)) = lines.next() {
            log::info!("In QDC calibration table: {header}");
        }
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let row = parse_row(line, idx + 1)?;
            if row.len() < MIN_CHARGE_COLUMNS {
                continue;
            }
            let key = ChargeKey::new(row[0] as u16, row[1] as u8, row[2] as u8, row[3] as u8);
            store.charge.insert(
                key,
                ChargeParams {
                    a: row[4],
                    b: row[5],
                    c: row[6],
                    d: row[8],
                    e: row.get(10).copied().unwrap_or(0.0),
                    chi2_ndof: chi2_ndof(row[7], row[9]),
                },
            );
        }

        let mut lines = time_table.lines().enumerate();
        if let Some((_, header)) = lines.next() {
            log::info!("In TDC calibration table: {header}");
        }
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let row = parse_row(line, idx + 1)?;
            if row.len() < MIN_TIME_COLUMNS {
                continue;
            }
            let key = TimeKey {
                board_id: row[0] as u16,
                tofpet_id: row[1] as u8,
                channel: row[2] as u8,
                tac: row[3] as u8,
                tdc: row[4] as u8,
            };
            store.time.insert(
                key,
                TimeParams {
                    a: row[5],
                    b: row[6],
                    c: row[7],
                    d: row.get(9).copied().unwrap_or(0.0),
                    chi2_ndof: chi2_ndof(row[8], row.get(10).copied().unwrap_or(0.0)),
                },
            );
        }

        log::info!(
            "Loaded {} charge fits and {} time fits",
            store.charge.len(),
            store.time.len()
        );
        Ok(store)
    }

    /// Read the two calibration tables from disk
    pub fn read(charge_path: &Path, time_path: &Path) -> Result<Self, CalibrationError> {
        for path in [charge_path, time_path] {
            if !path.exists() {
                return Err(CalibrationError::BadFilePath(path.to_path_buf()));
            }
        }
        let charge_table = std::fs::read_to_string(charge_path)?;
        let time_table = std::fs::read_to_string(time_path)?;
        Self::load(&charge_table, &time_table)
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn insert_charge(&mut self, key: ChargeKey, params: ChargeParams) {
        self.charge.insert(key, params);
    }

    pub fn insert_time(&mut self, key: TimeKey, params: TimeParams) {
        self.time.insert(key, params);
    }

    pub fn n_charge_fits(&self) -> usize {
        self.charge.len()
    }

    pub fn n_time_fits(&self) -> usize {
        self.time.len()
    }

    /// Fit quality of every calibrated channel.
    ///
    /// Keyed by `tac + 10*channel + 1000*tofpet + 100000*board`, the value is the
    /// (charge, time) chi2/ndof pair with -1 for a zero or absent value. Time fits are
    /// taken from the default TDC slot.
    pub fn report(&self) -> BTreeMap<u64, (f64, f64)> {
        let mut report = BTreeMap::new();
        for (key, par) in self.charge.iter() {
            let chi2 = if par.chi2_ndof != 0.0 {
                par.chi2_ndof
            } else {
                -1.0
            };
            let chi2_time = match self.time.get(&key.with_tdc(DEFAULT_TDC)) {
                Some(p) if p.chi2_ndof != 0.0 => p.chi2_ndof,
                _ => -1.0,
            };
            let report_key = key.tac as u64
                + 10 * key.channel as u64
                + 1_000 * key.tofpet_id as u64
                + 100_000 * key.board_id as u64;
            report.entry(report_key).or_insert((chi2, chi2_time));
        }
        report
    }
}

impl CalibrationLookup for CalibrationStore {
    fn charge_params(&self, key: &ChargeKey) -> Option<&ChargeParams> {
        self.charge.get(key)
    }

    fn time_params(&self, key: &TimeKey) -> Option<&TimeParams> {
        self.time.get(key)
    }

    fn gain(&self) -> f64 {
        self.gain
    }
}
