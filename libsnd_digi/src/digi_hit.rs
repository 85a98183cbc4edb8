use std::collections::BTreeMap;

use bitvec::prelude::*;

use super::cluster::Cluster;
use super::error::DigiHitError;
use super::hardware_id::DetectorID;

/// Run/event bookkeeping attached to each digitized event
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventHeader {
    pub run_number: i32,
    pub event_number: u64,
    pub timestamp: f64,
}

/// A digitized SciFi SiPM channel. Single slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ScifiHit {
    pub detector_id: DetectorID,
    pub charge: f64,
    pub time: f64,
    valid: bool,
}

impl ScifiHit {
    pub fn new(detector_id: DetectorID) -> Self {
        Self {
            detector_id,
            charge: 0.0,
            time: 0.0,
            valid: true,
        }
    }

    pub fn set_digi(&mut self, charge: f64, time: f64) {
        self.charge = charge;
        self.time = time;
    }

    pub fn set_invalid(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// What gets written into one SiPM slot of a MuFilter bar
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotDigi {
    pub charge: f64,
    pub time: f64,
    /// Failed the quality cuts
    pub masked: bool,
    /// Addressed through the unmapped-SiPM sentinel; the slot is a guess
    pub unmapped: bool,
}

/// A digitized MuFilter bar: `n_sipms` SiPMs on each of `n_sides` sides.
///
/// Slots `[0, n_sipms)` are the left side, `[n_sipms, 2*n_sipms)` the right side.
/// A slot counts as filled once something was written to it, whatever the values.
#[derive(Debug, Clone, PartialEq)]
pub struct MuFilterHit {
    pub detector_id: DetectorID,
    n_sipms: usize,
    n_sides: usize,
    signals: Vec<f64>,
    times: Vec<f64>,
    filled: BitVec,
    masked: BitVec,
    unmapped: BitVec,
}

impl MuFilterHit {
    pub fn new(detector_id: DetectorID, n_sipms: usize, n_sides: usize) -> Self {
        let n_slots = n_sipms * n_sides;
        Self {
            detector_id,
            n_sipms,
            n_sides,
            signals: vec![0.0; n_slots],
            times: vec![0.0; n_slots],
            filled: bitvec![0; n_slots],
            masked: bitvec![0; n_slots],
            unmapped: bitvec![0; n_slots],
        }
    }

    pub fn n_sipms(&self) -> usize {
        self.n_sipms
    }

    pub fn n_sides(&self) -> usize {
        self.n_sides
    }

    pub fn n_slots(&self) -> usize {
        self.signals.len()
    }

    /// Write a slot. The flags of the slot are replaced along with the values
    pub fn set_digi(&mut self, slot: usize, digi: SlotDigi) -> Result<(), DigiHitError> {
        if slot >= self.n_slots() {
            return Err(DigiHitError::SlotOutOfRange(
                self.detector_id,
                slot,
                self.n_slots(),
            ));
        }
        self.signals[slot] = digi.charge;
        self.times[slot] = digi.time;
        self.filled.set(slot, true);
        self.masked.set(slot, digi.masked);
        self.unmapped.set(slot, digi.unmapped);
        Ok(())
    }

    /// Signal in a slot; 0 for empty or out-of-range slots
    pub fn signal(&self, slot: usize) -> f64 {
        self.signals.get(slot).copied().unwrap_or(0.0)
    }

    pub fn time(&self, slot: usize) -> f64 {
        self.times.get(slot).copied().unwrap_or(0.0)
    }

    pub fn is_filled(&self, slot: usize) -> bool {
        self.filled.get(slot).map(|b| *b).unwrap_or(false)
    }

    pub fn is_masked(&self, slot: usize) -> bool {
        self.masked.get(slot).map(|b| *b).unwrap_or(false)
    }

    pub fn is_unmapped(&self, slot: usize) -> bool {
        self.unmapped.get(slot).map(|b| *b).unwrap_or(false)
    }

    pub fn n_masked(&self) -> usize {
        self.masked.count_ones()
    }

    pub fn n_unmapped(&self) -> usize {
        self.unmapped.count_ones()
    }
}

/// The digitized output of one event. Collections are ordered by detector id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigiEvent {
    pub header: EventHeader,
    pub scifi: BTreeMap<DetectorID, ScifiHit>,
    pub mufilter: BTreeMap<DetectorID, MuFilterHit>,
    pub clusters: Option<Vec<Cluster>>,
}
