// ChannelMap turns electronics addresses into detector element addresses.
//
// The two detectors use completely different schemes:
// SciFi:    [board -> (station, mat)] + [tofpet, channel] -> SiPM channel id
// MuFilter: [board, tofpet -> slot letter -> plane] + [tofpet parity, channel] -> SiPM index
//           -> (bar id, SiPM slot on the bar) via the wiring-offset table
//
// The wiring-offset table gives, per plane, the id of the first bar, the number of SiPMs
// per bar side (signed; negative means bar ids decrease with SiPM number) and the number
// of sides read out.
use std::str::FromStr;

use fxhash::FxHashMap;

use super::board_mapping::{BoardMapping, SiPMWiring};
use super::constants::*;
use super::error::{ChannelMapError, MappingError};
use super::hardware_id::{
    board_id_from_name, fibre_channel, tofpet_slot, wiring_key, DetectorID, MuSystem, Station,
};

/// One row of the wiring-offset table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneOffset {
    pub first_id: DetectorID,
    pub n_sipms: i32,
    pub n_sides: i32,
}

impl PlaneOffset {
    fn new(first_id: DetectorID, n_sipms: i32, n_sides: i32) -> Self {
        Self {
            first_id,
            n_sipms,
            n_sides,
        }
    }

    /// +1 if bar ids increase with SiPM number, -1 otherwise
    pub fn direction(&self) -> i32 {
        self.n_sipms.signum()
    }
}

/// What a DAQ board is connected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardKind {
    Fibre { station: Station, mat: i32 },
    MuFilter,
}

/// Fully resolved address of a MuFilter hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuAddress {
    pub system: MuSystem,
    pub plane: String,
    pub detector_id: DetectorID,
    pub sipm_channel: i32,
    pub slot: usize,
    pub n_sipms: usize,
    pub n_sides: usize,
    /// The wiring key was not found; `sipm_channel` is the sentinel value
    pub unmapped: bool,
}

/// Build the fixed plane -> (first bar id, signed SiPMs per side, sides) table
pub fn wiring_offsets() -> FxHashMap<String, PlaneOffset> {
    let mut offsets = FxHashMap::default();
    for i in 1..6 {
        if i < 3 {
            let off = PlaneOffset::new(10_000 + (i - 1) * 1000 + 6, -8, 2);
            offsets.insert(format!("Veto_{i}Left"), off);
            offsets.insert(format!("Veto_{i}Right"), off);
        }
        if i < 4 {
            let off = PlaneOffset::new(30_000 + (i - 1) * 1000 + 59, -1, 2);
            offsets.insert(format!("DS_{i}Left"), off);
            offsets.insert(format!("DS_{i}Right"), off);
        }
        if i < 5 {
            offsets.insert(
                format!("DS_{i}Vert"),
                PlaneOffset::new(30_000 + (i - 1) * 1000 + 119, -1, 1),
            );
        }
        let off = PlaneOffset::new(20_000 + (i - 1) * 1000 + 9, -8, 2);
        offsets.insert(format!("US_{i}Left"), off);
        offsets.insert(format!("US_{i}Right"), off);
    }
    offsets
}

/// ChannelMap is built once per run from the board mapping and SiPM wiring and is read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    fibre_boards: FxHashMap<String, (Station, i32)>,
    mufi_planes: FxHashMap<String, FxHashMap<char, String>>,
    mufi_system: FxHashMap<(u16, u8), MuSystem>,
    wiring: SiPMWiring,
    offsets: FxHashMap<String, PlaneOffset>,
}

impl ChannelMap {
    /// Create a new ChannelMap
    pub fn new(mapping: &BoardMapping, wiring: SiPMWiring) -> Result<Self, MappingError> {
        let mut map = ChannelMap {
            wiring,
            offsets: wiring_offsets(),
            ..Default::default()
        };

        for (board, stations) in mapping.scifi.iter() {
            if stations.len() > 1 {
                log::warn!(
                    "Board {board} is mapped to {} SciFi stations; using the last one",
                    stations.len()
                );
            }
            if let Some((station, mat)) = stations.iter().last() {
                map.fibre_boards
                    .insert(board.clone(), (Station::from_str(station)?, *mat));
            }
        }

        for (board, slots) in mapping.mufilter.iter() {
            let board_id = board_id_from_name(board)?;
            let mut planes = FxHashMap::default();
            for (slot, plane) in slots.iter() {
                let system = MuSystem::from_plane(plane)?;
                let letter = slot.chars().next().unwrap_or_default();
                for tofpet_id in 0..TOFPETS_PER_BOARD {
                    if tofpet_slot(tofpet_id) == letter {
                        map.mufi_system.insert((board_id, tofpet_id), system);
                    }
                }
                planes.insert(letter, plane.clone());
            }
            map.mufi_planes.insert(board.clone(), planes);
        }

        Ok(map)
    }

    /// Which detector a board feeds. None if the board is not in the mapping
    pub fn board_kind(&self, board: &str) -> Option<BoardKind> {
        if let Some((station, mat)) = self.fibre_boards.get(board) {
            Some(BoardKind::Fibre {
                station: station.clone(),
                mat: *mat,
            })
        } else if self.mufi_planes.contains_key(board) {
            Some(BoardKind::MuFilter)
        } else {
            None
        }
    }

    pub fn plane_offset(&self, plane: &str) -> Option<&PlaneOffset> {
        self.offsets.get(plane)
    }

    /// Global SiPM channel id of a SciFi hit
    pub fn resolve_fibre(
        &self,
        tofpet_id: u8,
        tofpet_channel: u8,
        mat: i32,
        station: &Station,
    ) -> DetectorID {
        let channel = fibre_channel(tofpet_id, tofpet_channel, mat);
        let local = channel - mat * CHANNELS_PER_MAT;
        1_000_000 * station.number
            + 100_000 * station.orientation()
            + 10_000 * mat
            + 1_000 * (local / CHANNELS_PER_SIPM)
            + channel % CHANNELS_PER_SIPM
    }

    /// Bar id and SiPM slot of a MuFilter hit.
    ///
    /// An unknown wiring key is not an error: the SiPM channel falls back to the sentinel
    /// and `unmapped` is set. Only a tofpet with no plane on the board fails.
    pub fn resolve_muon_filter(
        &self,
        board: &str,
        board_id: u16,
        tofpet_id: u8,
        tofpet_channel: u8,
    ) -> Result<MuAddress, ChannelMapError> {
        let unmapped_slot = || ChannelMapError::UnmappedSlot(board.to_string(), tofpet_id);
        let system = *self
            .mufi_system
            .get(&(board_id, tofpet_id))
            .ok_or_else(unmapped_slot)?;
        let plane = self
            .mufi_planes
            .get(board)
            .and_then(|planes| planes.get(&tofpet_slot(tofpet_id)))
            .ok_or_else(unmapped_slot)?;
        let offset = self
            .offsets
            .get(plane)
            .ok_or_else(|| ChannelMapError::UnknownPlane(plane.clone()))?;

        let key = wiring_key(tofpet_id, tofpet_channel);
        let (sipm_channel, unmapped) = match self.wiring.get(system, key) {
            Some(sipm) => (sipm - 1, false),
            None => {
                log::warn!(
                    "Wiring key {key} does not exist for system {system} ({} known keys); board {board} tofpet {tofpet_id} channel {tofpet_channel}",
                    self.wiring.len(system)
                );
                (UNMAPPED_SIPM_CHANNEL, true)
            }
        };

        let n_sipms = offset.n_sipms.abs();
        let n_sides = offset.n_sides.abs();
        let detector_id = offset.first_id + offset.direction() * (sipm_channel / n_sipms);
        let mut slot = sipm_channel % n_sipms;
        if plane.contains("Right") {
            slot += n_sipms;
        }

        Ok(MuAddress {
            system,
            plane: plane.clone(),
            detector_id,
            sipm_channel,
            slot: slot as usize,
            n_sipms: n_sipms as usize,
            n_sides: n_sides as usize,
            unmapped,
        })
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_map() -> ChannelMap {
        let mut mapping = BoardMapping::default();
        mapping
            .scifi
            .insert("board_11".into(), BTreeMap::from([("M1X".into(), 0)]));
        mapping
            .scifi
            .insert("board_17".into(), BTreeMap::from([("M2Y".into(), 1)]));
        mapping.mufilter.insert(
            "board_1".into(),
            BTreeMap::from([
                ("A".into(), "US_1Left".into()),
                ("B".into(), "US_1Right".into()),
                ("C".into(), "DS_2Vert".into()),
            ]),
        );
        let mut wiring = SiPMWiring::default();
        wiring.insert(MuSystem::Upstream, 5, 1);
        wiring.insert(MuSystem::Upstream, 1005, 11);
        wiring.insert(MuSystem::Downstream, 3, 4);
        ChannelMap::new(&mapping, wiring).unwrap()
    }

    #[test]
    fn test_wiring_offsets() {
        let offsets = wiring_offsets();
        assert_eq!(offsets.len(), 2 * 2 + 3 * 2 + 4 + 5 * 2);
        assert_eq!(offsets["Veto_2Right"], PlaneOffset::new(11_006, -8, 2));
        assert_eq!(offsets["DS_3Left"], PlaneOffset::new(32_059, -1, 2));
        assert_eq!(offsets["DS_4Vert"], PlaneOffset::new(33_119, -1, 1));
        assert_eq!(offsets["US_5Left"], PlaneOffset::new(24_009, -8, 2));
        assert!(!offsets.contains_key("DS_4Left"));
        assert!(!offsets.contains_key("Veto_3Left"));
    }

    #[test]
    fn test_board_kind() {
        let map = test_map();
        assert!(matches!(
            map.board_kind("board_17"),
            Some(BoardKind::Fibre { mat: 1, .. })
        ));
        assert_eq!(map.board_kind("board_1"), Some(BoardKind::MuFilter));
        assert_eq!(map.board_kind("board_99"), None);
    }

    #[test]
    fn test_resolve_fibre() {
        let map = test_map();
        let station = Station::from_str("M1X").unwrap();
        assert_eq!(map.resolve_fibre(0, 63, 0, &station), 1_000_000);
        let station = Station::from_str("M2Y").unwrap();
        // channel = 64 + 63 - 0 + 512 = 639, local = 127
        assert_eq!(map.resolve_fibre(1, 0, 1, &station), 2_110_127);
        // channel = 64*3 + 63 - 10 + 512 = 757, local = 245
        assert_eq!(map.resolve_fibre(3, 10, 1, &station), 2_111_117);
    }

    #[test]
    fn test_resolve_muon_filter() {
        let map = test_map();
        // tofpet 0 -> slot A -> US_1Left; key 5 -> SiPM 1 -> channel 0
        let addr = map.resolve_muon_filter("board_1", 1, 0, 5).unwrap();
        assert_eq!(addr.system, MuSystem::Upstream);
        assert_eq!(addr.detector_id, 20_009);
        assert_eq!(addr.slot, 0);
        assert_eq!((addr.n_sipms, addr.n_sides), (8, 2));
        assert!(!addr.unmapped);

        // tofpet 3 -> slot B -> US_1Right; key 1005 -> SiPM 11 -> channel 10
        let addr = map.resolve_muon_filter("board_1", 1, 3, 5).unwrap();
        assert_eq!(addr.detector_id, 20_009 - 1);
        assert_eq!(addr.slot, 2 + 8);

        // tofpet 4 -> slot C -> DS_2Vert; key 3 -> SiPM 4 -> channel 3
        let addr = map.resolve_muon_filter("board_1", 1, 4, 3).unwrap();
        assert_eq!(addr.system, MuSystem::Downstream);
        assert_eq!(addr.detector_id, 31_119 - 3);
        assert_eq!(addr.slot, 0);
    }

    #[test]
    fn test_unknown_wiring_key_gives_sentinel() {
        let map = test_map();
        let addr = map.resolve_muon_filter("board_1", 1, 0, 42).unwrap();
        assert!(addr.unmapped);
        assert_eq!(addr.sipm_channel, UNMAPPED_SIPM_CHANNEL);
        assert_eq!(addr.detector_id, 20_009 - 12);
        assert_eq!(addr.slot, 3);
    }

    #[test]
    fn test_unmapped_slot() {
        let map = test_map();
        assert!(matches!(
            map.resolve_muon_filter("board_1", 1, 6, 5),
            Err(ChannelMapError::UnmappedSlot(_, 6))
        ));
    }
}
