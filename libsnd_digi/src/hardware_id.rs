use super::constants::*;
use super::error::HardwareError;
use std::fmt::Display;
use std::str::FromStr;

/// Global address of one physical readout element (a SciFi SiPM channel or a MuFilter bar)
pub type DetectorID = i32;

/// The three MuFilter sub-systems. The discriminant is the legacy system index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MuSystem {
    Veto = 0,
    Upstream = 1,
    Downstream = 2,
}

impl MuSystem {
    pub const ALL: [MuSystem; 3] = [MuSystem::Veto, MuSystem::Upstream, MuSystem::Downstream];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Keyword used in plane names and SiPM wiring file names
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Veto => "Veto",
            Self::Upstream => "US",
            Self::Downstream => "DS",
        }
    }

    /// Determine the system from a plane name such as `US_3Left`
    pub fn from_plane(plane: &str) -> Result<Self, HardwareError> {
        let prefix = plane.split('_').next().unwrap_or_default();
        Self::from_str(prefix).map_err(|_| HardwareError::BadPlane(plane.to_string()))
    }
}

impl FromStr for MuSystem {
    type Err = HardwareError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "Veto" {
            Ok(Self::Veto)
        } else if s == "US" {
            Ok(Self::Upstream)
        } else if s == "DS" {
            Ok(Self::Downstream)
        } else {
            Err(HardwareError::BadPlane(s.to_string()))
        }
    }
}

impl Display for MuSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// A SciFi station name such as `M3Y`: prefix character, station number, orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub name: String,
    pub number: i32,
    pub vertical: bool,
}

impl Station {
    pub fn orientation(&self) -> i32 {
        if self.vertical {
            1
        } else {
            0
        }
    }
}

impl FromStr for Station {
    type Err = HardwareError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() < 3 || !bytes[1].is_ascii_digit() {
            return Err(HardwareError::BadStation(s.to_string()));
        }
        Ok(Self {
            name: s.to_string(),
            number: (bytes[1] - b'0') as i32,
            vertical: bytes[2] == b'Y',
        })
    }
}

/// Parse the numeric board id out of a board name such as `board_11`
pub fn board_id_from_name(name: &str) -> Result<u16, HardwareError> {
    name.split_once('_')
        .and_then(|(_, id)| id.parse().ok())
        .ok_or_else(|| HardwareError::BadBoardName(name.to_string()))
}

/// Connector slot letter a tofpet is plugged into. Tofpets come in pairs: 0,1 -> A, 2,3 -> B, ...
pub fn tofpet_slot(tofpet_id: u8) -> char {
    (b'A' + tofpet_id / 2) as char
}

/// Linear SciFi channel number. 512 channels per mat; tofpet channels count downwards.
pub fn fibre_channel(tofpet_id: u8, tofpet_channel: u8, mat: i32) -> i32 {
    CHANNELS_PER_TOFPET * tofpet_id as i32 + (CHANNELS_PER_TOFPET - 1) - tofpet_channel as i32
        + CHANNELS_PER_MAT * mat
}

/// Lookup key into a system's SiPM wiring table
pub fn wiring_key(tofpet_id: u8, tofpet_channel: u8) -> i32 {
    (tofpet_id % 2) as i32 * WIRING_KEY_PARITY_SCALE + tofpet_channel as i32
}
