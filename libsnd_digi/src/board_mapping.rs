use std::collections::BTreeMap;
use std::path::Path;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::error::MappingError;
use super::hardware_id::MuSystem;

const LEGACY_ENTRIES_PER_LINE: usize = 4; //system, board, key, value
const MIN_SIPM_ENTRIES_PER_LINE: usize = 5; //SiPM + at least 4 fields

/// Which on-disk flavour the board mapping is stored in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingFormat {
    #[default]
    Json,
    Legacy,
}

impl MappingFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Json => "board_mapping.json",
            Self::Legacy => "board_mapping.csv",
        }
    }
}

/// Static wiring of the DAQ boards.
///
/// - `scifi`: board name -> station name -> mat
/// - `mufilter`: board name -> slot letter -> plane name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardMapping {
    #[serde(rename = "Scifi", default)]
    pub scifi: BTreeMap<String, BTreeMap<String, i32>>,
    #[serde(rename = "MuFilter", default)]
    pub mufilter: BTreeMap<String, BTreeMap<String, String>>,
}

impl BoardMapping {
    pub fn from_json_str(contents: &str) -> Result<Self, MappingError> {
        Ok(serde_json::from_str::<Self>(contents)?)
    }

    /// Parse the legacy CSV flavour: `system,board,key,value` with a header line
    pub fn from_legacy_str(contents: &str) -> Result<Self, MappingError> {
        let mut mapping = Self::default();
        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(',').map(str::trim).collect();
            if entries.len() != LEGACY_ENTRIES_PER_LINE {
                return Err(MappingError::BadFileFormat);
            }
            match entries[0] {
                "Scifi" => {
                    mapping
                        .scifi
                        .entry(entries[1].to_string())
                        .or_default()
                        .insert(entries[2].to_string(), entries[3].parse()?);
                }
                "MuFilter" => {
                    mapping
                        .mufilter
                        .entry(entries[1].to_string())
                        .or_default()
                        .insert(entries[2].to_string(), entries[3].to_string());
                }
                other => return Err(MappingError::BadSystem(other.to_string())),
            }
        }
        Ok(mapping)
    }

    pub fn read(path: &Path, format: MappingFormat) -> Result<Self, MappingError> {
        if !path.exists() {
            return Err(MappingError::BadFilePath(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        match format {
            MappingFormat::Json => Self::from_json_str(&contents),
            MappingFormat::Legacy => Self::from_legacy_str(&contents),
        }
    }
}

/// Per-system lookup from `(tofpet parity * 1000 + tofpet channel)` to the 1-based SiPM index
#[derive(Debug, Clone, Default)]
pub struct SiPMWiring {
    tables: [FxHashMap<i32, i32>; 3],
}

impl SiPMWiring {
    /// Add one system's wiring file contents
    pub fn parse_system(&mut self, system: MuSystem, contents: &str) -> Result<(), MappingError> {
        let mut lines = contents.lines();
        if let Some(header) = lines.next() {
            log::info!("In {system} SiPM map file: {header}");
        }
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(',').map(str::trim).collect();
            if entries.len() < MIN_SIPM_ENTRIES_PER_LINE {
                return Err(MappingError::BadFileFormat);
            }
            let sipm: i32 = entries[0].parse()?;
            let parity: i32 = entries[3].parse()?;
            let channel: i32 = entries[4].parse()?;
            self.insert(system, parity * 1000 + channel, sipm);
        }
        Ok(())
    }

    /// Read `Veto_SiPM_mapping.csv`, `US_SiPM_mapping.csv` and `DS_SiPM_mapping.csv` from a directory
    pub fn read(dir: &Path) -> Result<Self, MappingError> {
        let mut wiring = Self::default();
        for system in MuSystem::ALL {
            let path = dir.join(format!("{}_SiPM_mapping.csv", system.keyword()));
            if !path.exists() {
                return Err(MappingError::BadFilePath(path));
            }
            let contents = std::fs::read_to_string(&path)?;
            wiring.parse_system(system, &contents)?;
        }
        Ok(wiring)
    }

    pub fn insert(&mut self, system: MuSystem, key: i32, sipm: i32) {
        self.tables[system.index()].insert(key, sipm);
    }

    pub fn get(&self, system: MuSystem, key: i32) -> Option<i32> {
        self.tables[system.index()].get(&key).copied()
    }

    pub fn len(&self, system: MuSystem) -> usize {
        self.tables[system.index()].len()
    }
}
