use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("CalibrationStore failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open calibration table because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("CalibrationStore failed to parse a number in line {line}: {source}")]
    ParsingError {
        line: usize,
        source: std::num::ParseFloatError,
    },
}

#[derive(Debug, Clone, Error)]
pub enum HardwareError {
    #[error("Found invalid station name: {0}")]
    BadStation(String),
    #[error("Found invalid MuFilter plane name: {0}")]
    BadPlane(String),
    #[error("Found invalid board name: {0}")]
    BadBoardName(String),
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("BoardMapping failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open mapping because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("BoardMapping failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("BoardMapping failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("BoardMapping was given a file with the incorrect format; most likely the number of columns is incorrect")]
    BadFileFormat,
    #[error("BoardMapping found an unknown detector system keyword: {0}")]
    BadSystem(String),
    #[error("BoardMapping failed due to hardware naming error: {0}")]
    BadHardware(#[from] HardwareError),
}

#[derive(Debug, Clone, Error)]
pub enum ChannelMapError {
    #[error("Board {0} has no MuFilter plane wired to tofpet {1}")]
    UnmappedSlot(String, u8),
    #[error("MuFilter plane {0} has no entry in the wiring-offset table")]
    UnknownPlane(String),
}

#[derive(Debug, Clone, Error)]
pub enum DigiHitError {
    #[error("MuFilterHit {0} was given SiPM slot {1} but only has {2} slots")]
    SlotOutOfRange(i32, usize, usize),
}

#[derive(Debug, Error)]
pub enum RawSourceError {
    #[error("RawSource failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open raw data because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("RawSource did not find any board files in the raw data directory")]
    NoBoardFiles,
    #[error("RawSource failed to parse an integer in {file}: {source}")]
    ParsingError {
        file: String,
        source: std::num::ParseIntError,
    },
    #[error("RawSource was given a file with the incorrect format: {0}")]
    BadFileFormat(String),
    #[error("RawSource failed due to hardware naming error: {0}")]
    BadHardware(#[from] HardwareError),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("DigiWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to CalibrationStore error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to BoardMapping error: {0}")]
    MappingError(#[from] MappingError),
    #[error("Processor failed due to RawSource error: {0}")]
    RawSourceError(#[from] RawSourceError),
    #[error("Processor failed due to DigiWriter error: {0}")]
    WriterError(#[from] WriterError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
