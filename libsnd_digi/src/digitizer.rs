use std::collections::BTreeMap;

use super::calibration::{Calibrated, CalibrationLookup};
use super::channel_map::{BoardKind, ChannelMap, MuAddress};
use super::constants::*;
use super::digi_hit::{DigiEvent, EventHeader, MuFilterHit, ScifiHit, SlotDigi};
use super::hardware_id::{board_id_from_name, DetectorID};
use super::quality::{classify, Classification, QualityCuts};
use super::raw_source::{RawEvent, RawHit};

/// Digitizer takes RawEvents and converts them into DigiEvents.
///
/// Each raw hit is calibrated, classified, resolved to a detector element and finally
/// aggregated into the hit of that element. The Digitizer only borrows the calibration
/// and the channel map; all per-event state lives inside [`Digitizer::process_event`].
#[derive(Debug)]
pub struct Digitizer<'a, C: CalibrationLookup> {
    calibration: &'a C,
    channel_map: &'a ChannelMap,
    cuts: QualityCuts,
    run_number: i32,
}

impl<'a, C: CalibrationLookup> Digitizer<'a, C> {
    pub fn new(
        calibration: &'a C,
        channel_map: &'a ChannelMap,
        cuts: QualityCuts,
        run_number: i32,
    ) -> Self {
        Self {
            calibration,
            channel_map,
            cuts,
            run_number,
        }
    }

    /// Digitize one event.
    ///
    /// Boards are visited in name order. An unknown board stops the board loop for this
    /// event; whatever was digitized before it is kept.
    pub fn process_event(&self, event: &RawEvent) -> DigiEvent {
        let mut scifi: BTreeMap<DetectorID, ScifiHit> = BTreeMap::new();
        let mut mufilter: BTreeMap<DetectorID, MuFilterHit> = BTreeMap::new();

        for (board, hits) in event.boards.iter() {
            let Some(kind) = self.channel_map.board_kind(board) else {
                log::error!(
                    "{board} not known. Serious error, skipping remaining boards of event {}",
                    event.event_number
                );
                break;
            };
            let board_id = match board_id_from_name(board) {
                Ok(id) => id,
                Err(e) => {
                    log::error!("{e}; skipping board");
                    continue;
                }
            };

            for hit in hits.iter() {
                log::trace!("{board} {hit:?}");
                let (calibrated, class) = self.calibrate_hit(board_id, hit);
                match &kind {
                    BoardKind::Fibre { station, mat } => {
                        let id = self.channel_map.resolve_fibre(
                            hit.tofpet_id,
                            hit.tofpet_channel,
                            *mat,
                            station,
                        );
                        add_scifi_hit(&mut scifi, id, &class, calibrated.timestamp);
                        log::debug!(
                            "scifi hit {id} ({}): qdc = {} tdc = {}",
                            station.name,
                            class.charge,
                            calibrated.timestamp
                        );
                    }
                    BoardKind::MuFilter => {
                        match self.channel_map.resolve_muon_filter(
                            board,
                            board_id,
                            hit.tofpet_id,
                            hit.tofpet_channel,
                        ) {
                            Ok(address) => add_mufilter_hit(
                                &mut mufilter,
                                &address,
                                &class,
                                calibrated.timestamp,
                            ),
                            Err(e) => {
                                log::warn!("{e}; dropping hit in event {}", event.event_number)
                            }
                        }
                    }
                }
            }
        }

        DigiEvent {
            header: EventHeader {
                run_number: self.run_number,
                event_number: event.event_number,
                timestamp: event.timestamp,
            },
            scifi,
            mufilter,
            clusters: None,
        }
    }

    /// Calibrate and classify a single hit
    pub fn calibrate_hit(&self, board_id: u16, hit: &RawHit) -> (Calibrated, Classification) {
        let calibrated = self.calibration.calibrate(board_id, hit, DEFAULT_TDC);
        if calibrated.missing.any() {
            log::debug!(
                "No calibration for board {board_id} tofpet {} channel {} tac {} (charge missing: {}, time missing: {}); using zeros",
                hit.tofpet_id,
                hit.tofpet_channel,
                hit.tac,
                calibrated.missing.charge,
                calibrated.missing.time
            );
        }
        let class = classify(
            calibrated.charge,
            calibrated.chi2,
            calibrated.saturation,
            &self.cuts,
        );
        if let Some(sentinel) = class.diagnostic {
            log::debug!(
                "{sentinel} board {board_id} tofpet {} channel {} tac {} v_coarse {} v_fine {} fine time {} chi2 {}",
                hit.tofpet_id,
                hit.tofpet_channel,
                hit.tac,
                hit.v_coarse,
                hit.v_fine,
                calibrated.timestamp - hit.t_coarse as f64,
                calibrated.chi2
            );
        }
        (calibrated, class)
    }
}

/// Write a classified hit into the SciFi collection. A repeated id keeps the last values.
fn add_scifi_hit(
    store: &mut BTreeMap<DetectorID, ScifiHit>,
    id: DetectorID,
    class: &Classification,
    time: f64,
) {
    let hit = store.entry(id).or_insert_with(|| ScifiHit::new(id));
    hit.set_digi(class.charge, time);
    if !class.valid {
        hit.set_invalid();
    }
}

/// Write a classified hit into its slot of the MuFilter bar, flagging suspicious addresses.
///
/// Out-of-range slots are dropped before any bar is created. A hit addressed through the
/// unmapped-SiPM sentinel is masked and marked, and never replaces a slot that a mapped hit
/// already filled.
fn add_mufilter_hit(
    store: &mut BTreeMap<DetectorID, MuFilterHit>,
    address: &MuAddress,
    class: &Classification,
    time: f64,
) {
    let existing = store.get(&address.detector_id);
    let capacity = existing.map_or(address.n_sipms * address.n_sides, MuFilterHit::n_slots);
    let previous = existing.map_or(0.0, |hit| hit.signal(address.slot));
    if previous > 0.0
        || address.detector_id % 1000 > MAX_BAR_IN_PLANE
        || address.slot >= capacity
    {
        log::warn!(
            "Anomalous MuFilter hit {} SiPM {} plane {} system {} (sipm channel {}, previous signal {previous})",
            address.detector_id,
            address.slot,
            address.plane,
            address.system,
            address.sipm_channel
        );
    }
    if address.slot >= capacity {
        log::warn!(
            "Slot {} is out of range for bar {} ({capacity} slots); dropping hit",
            address.slot,
            address.detector_id
        );
        return;
    }
    let mapped_slot_filled =
        existing.is_some_and(|hit| hit.is_filled(address.slot) && !hit.is_unmapped(address.slot));
    if address.unmapped && mapped_slot_filled {
        log::warn!(
            "Unmapped SiPM hit would replace slot {} of bar {}; dropping it",
            address.slot,
            address.detector_id
        );
        return;
    }

    let hit = store
        .entry(address.detector_id)
        .or_insert_with(|| MuFilterHit::new(address.detector_id, address.n_sipms, address.n_sides));
    let digi = SlotDigi {
        charge: class.charge,
        time,
        masked: !class.valid || address.unmapped,
        unmapped: address.unmapped,
    };
    if let Err(e) = hit.set_digi(address.slot, digi) {
        log::warn!("{e}; dropping hit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board_mapping::{BoardMapping, SiPMWiring};
    use crate::calibration::{CalibrationStore, ChargeKey, ChargeParams, TimeParams};
    use crate::hardware_id::MuSystem;
    use approx::assert_relative_eq;

    // With a = b = 0 the charge response is flat: charge = v_fine - d + c*ln2
    fn time_params() -> TimeParams {
        TimeParams {
            a: 0.0001,
            b: -0.1,
            c: 0.0,
            d: 0.0,
            chi2_ndof: 1.0,
        }
    }

    fn charge_params(chi2_ndof: f64) -> ChargeParams {
        ChargeParams {
            a: 0.0,
            b: 0.0,
            c: 100.0,
            d: 100.0,
            e: 0.0,
            chi2_ndof,
        }
    }

    fn store() -> CalibrationStore {
        let mut store = CalibrationStore::default();
        for board in [1u16, 11] {
            for tofpet in 0..8u8 {
                for channel in 0..64u8 {
                    let key = ChargeKey::new(board, tofpet, channel, 0);
                    store.insert_charge(key, charge_params(1.0));
                    store.insert_time(key.with_tdc(0), time_params());
                }
            }
        }
        // A poorly fitted channel
        store.insert_charge(ChargeKey::new(11, 0, 9, 0), charge_params(5000.0));
        store
    }

    fn channel_map() -> ChannelMap {
        let mut mapping = BoardMapping::default();
        mapping
            .scifi
            .insert("board_11".into(), BTreeMap::from([("M1X".into(), 0)]));
        mapping.mufilter.insert(
            "board_1".into(),
            BTreeMap::from([
                ("A".into(), "US_1Left".into()),
                ("B".into(), "US_1Right".into()),
            ]),
        );
        let mut wiring = SiPMWiring::default();
        // SiPM 1 and 2 of the first bar
        wiring.insert(MuSystem::Upstream, 5, 1);
        wiring.insert(MuSystem::Upstream, 6, 2);
        wiring.insert(MuSystem::Upstream, 1005, 3);
        // SiPM numbering starts at 1, so this points before the first slot
        wiring.insert(MuSystem::Upstream, 7, 0);
        ChannelMap::new(&mapping, wiring).unwrap()
    }

    // DS_1Left SiPM 40 and the DS_1Vert sentinel both land on bar 30_020, slot 0
    fn downstream_map() -> ChannelMap {
        let mut mapping = BoardMapping::default();
        mapping.mufilter.insert(
            "board_1".into(),
            BTreeMap::from([
                ("A".into(), "DS_1Left".into()),
                ("C".into(), "DS_1Vert".into()),
            ]),
        );
        let mut wiring = SiPMWiring::default();
        wiring.insert(MuSystem::Downstream, 5, 40);
        ChannelMap::new(&mapping, wiring).unwrap()
    }

    fn raw(tofpet_id: u8, tofpet_channel: u8, v_fine: u16) -> RawHit {
        RawHit {
            tofpet_id,
            tofpet_channel,
            tac: 0,
            t_coarse: 500,
            t_fine: 50,
            v_coarse: 10,
            v_fine,
        }
    }

    fn event(boards: Vec<(&str, Vec<RawHit>)>) -> RawEvent {
        let mut event = RawEvent::new(7, 123.0);
        for (name, hits) in boards {
            event.boards.insert(name.to_string(), hits);
        }
        event
    }

    #[test]
    fn test_good_scifi_hit() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 42);
        let digi = digitizer.process_event(&event(vec![("board_11", vec![raw(0, 63, 50)])]));
        assert_eq!(digi.header.run_number, 42);
        assert_eq!(digi.header.event_number, 7);
        assert_eq!(digi.scifi.len(), 1);
        let hit = &digi.scifi[&1_000_000];
        assert!(hit.is_valid());
        let cal = store.calibrate(11, &raw(0, 63, 50), 0);
        assert_eq!(hit.charge, cal.charge);
        assert_relative_eq!(hit.time, cal.timestamp);
    }

    #[test]
    fn test_chi2_rejected_scifi_hit() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let digi = digitizer.process_event(&event(vec![("board_11", vec![raw(0, 9, 90)])]));
        let hit = digi.scifi.values().next().unwrap();
        assert!(!hit.is_valid());
        assert!(hit.charge < 0.0);
    }

    #[test]
    fn test_saturated_scifi_hit() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        // v_fine / d = 0.99 > 0.95
        let digi = digitizer.process_event(&event(vec![("board_11", vec![raw(0, 63, 99)])]));
        let hit = &digi.scifi[&1_000_000];
        assert!(!hit.is_valid());
        let cal = store.calibrate(11, &raw(0, 63, 99), 0);
        assert_relative_eq!(hit.charge, cal.charge.floor() + 0.99 / 1000.0);
    }

    #[test]
    fn test_missing_calibration_is_flagged() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let mut hit = raw(0, 63, 50);
        hit.tac = 3;
        let digi = digitizer.process_event(&event(vec![("board_11", vec![hit])]));
        let hit = &digi.scifi[&1_000_000];
        assert!(!hit.is_valid());
        // NaN charge is packed as 988 + saturation fraction
        assert!(hit.charge >= 988.0 && hit.charge < 989.0);
    }

    #[test]
    fn test_mufilter_slots_share_bar() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let digi = digitizer.process_event(&event(vec![(
            "board_1",
            vec![raw(0, 5, 40), raw(0, 6, 60), raw(1, 5, 20)],
        )]));
        assert_eq!(digi.mufilter.len(), 1);
        let bar = &digi.mufilter[&20_009];
        assert_eq!(bar.n_slots(), 16);
        let q0 = store.calibrate(1, &raw(0, 5, 40), 0).charge;
        let q1 = store.calibrate(1, &raw(0, 6, 60), 0).charge;
        assert_eq!(bar.signal(0), q0);
        assert_eq!(bar.signal(1), q1);
        assert_ne!(bar.signal(0), bar.signal(1));
        // tofpet 1 is slot A as well (left side); SiPM 3 -> slot 2
        assert_eq!(bar.signal(2), store.calibrate(1, &raw(1, 5, 20), 0).charge);
        assert_eq!(bar.n_masked(), 0);
    }

    #[test]
    fn test_mufilter_right_side_and_unmapped_key() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let digi = digitizer.process_event(&event(vec![(
            "board_1",
            vec![raw(2, 5, 40), raw(0, 30, 40)],
        )]));
        // tofpet 2 -> slot B -> US_1Right, SiPM 1 -> slot 8
        assert_relative_eq!(
            digi.mufilter[&20_009].signal(8),
            40.0 - 100.0 + 100.0 * 2f64.ln(),
            epsilon = 1e-9
        );
        assert!(!digi.mufilter[&20_009].is_unmapped(8));
        // unmapped key -> sentinel channel 99 -> bar 20_009 - 12, slot 3
        let bar = &digi.mufilter[&19_997];
        assert!(bar.signal(3) != 0.0);
        assert!(bar.is_unmapped(3));
        assert!(bar.is_masked(3));
    }

    #[test]
    fn test_unmapped_hit_keeps_mapped_slot() {
        let (store, map) = (store(), downstream_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let real = raw(0, 5, 40);
        let sentinel = raw(4, 42, 60);
        let expected = store.calibrate(1, &real, 0).charge;

        for hits in [vec![real, sentinel], vec![sentinel, real]] {
            let digi = digitizer.process_event(&event(vec![("board_1", hits)]));
            assert_eq!(digi.mufilter.len(), 1);
            let bar = &digi.mufilter[&30_020];
            assert_eq!(bar.signal(0), expected);
            assert!(!bar.is_unmapped(0));
            assert!(!bar.is_masked(0));
        }
    }

    #[test]
    fn test_out_of_range_slot_creates_no_bar() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let digi = digitizer.process_event(&event(vec![("board_1", vec![raw(0, 7, 40)])]));
        assert!(digi.mufilter.is_empty());
        // a good hit on the same bar is unaffected
        let digi = digitizer.process_event(&event(vec![(
            "board_1",
            vec![raw(0, 7, 40), raw(0, 5, 40)],
        )]));
        assert_eq!(digi.mufilter.len(), 1);
        assert_eq!(digi.mufilter[&20_009].n_unmapped(), 0);
    }

    #[test]
    fn test_unknown_board_stops_board_loop() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let digi = digitizer.process_event(&event(vec![
            ("board_1", vec![raw(0, 5, 40)]),
            ("board_10", vec![raw(0, 5, 40)]),
            ("board_11", vec![raw(0, 63, 50)]),
        ]));
        // board_1 is processed, board_10 is unknown, board_11 is never reached
        assert_eq!(digi.mufilter.len(), 1);
        assert!(digi.scifi.is_empty());
    }

    #[test]
    fn test_events_are_independent() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let ev = event(vec![
            ("board_1", vec![raw(0, 5, 40), raw(2, 6, 30)]),
            ("board_11", vec![raw(0, 63, 50), raw(0, 9, 90), raw(3, 1, 20)]),
        ]);
        let first = digitizer.process_event(&ev);
        let other = digitizer.process_event(&event(vec![("board_11", vec![raw(1, 1, 10)])]));
        let second = digitizer.process_event(&ev);
        assert_eq!(first, second);
        assert_eq!(other.scifi.len(), 1);
        assert!(other.mufilter.is_empty());
    }

    #[test]
    fn test_ascending_order() {
        let (store, map) = (store(), channel_map());
        let digitizer = Digitizer::new(&store, &map, QualityCuts::default(), 0);
        let digi = digitizer.process_event(&event(vec![(
            "board_11",
            vec![raw(3, 1, 20), raw(0, 63, 50), raw(1, 0, 30)],
        )]));
        let ids: Vec<DetectorID> = digi.scifi.keys().copied().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);
    }
}
