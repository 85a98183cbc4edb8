use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::board_mapping::MappingFormat;
use super::constants::*;
use super::error::ConfigError;
use super::quality::QualityCuts;

const CHARGE_TABLE_NAME: &str = "qdc_cal.csv";
const TIME_TABLE_NAME: &str = "tdc_cal.csv";

/// Structure representing the application configuration. Contains pathing, run and cut information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub raw_data_path: PathBuf,
    pub calibration_path: PathBuf,
    pub sipm_map_path: PathBuf,
    pub output_path: PathBuf,
    pub mapping_format: MappingFormat,
    pub run_number: i32,
    pub first_event: u64,
    pub n_events: Option<u64>,
    pub heartbeat: u64,
    pub chi2_max: f64,
    pub saturation_limit: f64,
    pub charge_gain: f64,
    pub make_clusters: bool,
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    /// Generate a new Config object. All paths will be empty/invalid
    fn default() -> Self {
        Self {
            raw_data_path: PathBuf::from("None"),
            calibration_path: PathBuf::from("None"),
            sipm_map_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            mapping_format: MappingFormat::Json,
            run_number: 0,
            first_event: 0,
            n_events: None,
            heartbeat: 10_000,
            chi2_max: DEFAULT_CHI2_MAX,
            saturation_limit: DEFAULT_SATURATION_LIMIT,
            charge_gain: DEFAULT_CHARGE_GAIN,
            make_clusters: false,
            debug: false,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn quality_cuts(&self) -> QualityCuts {
        QualityCuts {
            chi2_max: self.chi2_max,
            saturation_limit: self.saturation_limit,
        }
    }

    /// Get the path to the raw data directory of the run
    pub fn get_raw_directory(&self) -> Result<PathBuf, ConfigError> {
        if self.raw_data_path.exists() {
            Ok(self.raw_data_path.clone())
        } else {
            Err(ConfigError::BadFilePath(self.raw_data_path.clone()))
        }
    }

    /// Get the paths to the charge and time calibration tables
    pub fn get_calibration_tables(&self) -> Result<(PathBuf, PathBuf), ConfigError> {
        let charge = self.calibration_path.join(CHARGE_TABLE_NAME);
        let time = self.calibration_path.join(TIME_TABLE_NAME);
        for path in [&charge, &time] {
            if !path.exists() {
                return Err(ConfigError::BadFilePath(path.clone()));
            }
        }
        Ok((charge, time))
    }

    /// Get the path to the board mapping, which lives next to the calibration tables
    pub fn get_board_mapping(&self) -> Result<PathBuf, ConfigError> {
        let path = self.calibration_path.join(self.mapping_format.file_name());
        if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::BadFilePath(path))
        }
    }

    /// Get the directory holding the MuFilter SiPM wiring files
    pub fn get_sipm_map_directory(&self) -> Result<PathBuf, ConfigError> {
        if self.sipm_map_path.exists() {
            Ok(self.sipm_map_path.clone())
        } else {
            Err(ConfigError::BadFilePath(self.sipm_map_path.clone()))
        }
    }

    /// Get the paths to the output files. The cluster file is None if clustering is disabled
    pub fn get_output_files(&self) -> Result<(PathBuf, Option<PathBuf>), ConfigError> {
        if !self.output_path.exists() {
            return Err(ConfigError::BadFilePath(self.output_path.clone()));
        }
        let run_str = self.get_run_str();
        let digi = self.output_path.join(format!("{run_str}_digi.csv"));
        let clusters = self
            .make_clusters
            .then(|| self.output_path.join(format!("{run_str}_clusters.csv")));
        Ok((digi, clusters))
    }

    /// Construct the run string using the SND DAQ format
    fn get_run_str(&self) -> String {
        format!("run_{:0>6}", self.run_number)
    }

    /// Is the event inside the configured window
    pub fn is_event_selected(&self, event_number: u64, n_processed: u64) -> bool {
        event_number >= self.first_event && self.n_events.map_or(true, |n| n_processed < n)
    }

    /// Per-hit diagnostics (missing calibration, 987/988 literals) are logged at debug level
    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    pub fn is_heartbeat_valid(&self) -> bool {
        self.heartbeat >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = Config::default();
        config.run_number = 5120;
        config.mapping_format = MappingFormat::Legacy;
        config.n_events = Some(100);
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(read.run_number, 5120);
        assert_eq!(read.mapping_format, MappingFormat::Legacy);
        assert_eq!(read.n_events, Some(100));
        assert_eq!(read.quality_cuts(), QualityCuts::default());
    }

    #[test]
    fn test_debug_switch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        // Older configs without the field still load
        let without_debug: String = yaml
            .lines()
            .filter(|l| !l.starts_with("debug"))
            .map(|l| format!("{l}\n"))
            .collect();
        std::fs::write(&path, without_debug).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert!(!read.debug);
        assert_eq!(read.log_level(), log::LevelFilter::Info);

        config.debug = true;
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(read.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::read_config_file(Path::new("/definitely/not/here.yml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            calibration_path: dir.path().to_path_buf(),
            output_path: dir.path().to_path_buf(),
            run_number: 42,
            make_clusters: true,
            ..Default::default()
        };
        assert!(config.get_calibration_tables().is_err());
        assert!(config.get_board_mapping().is_err());
        std::fs::write(dir.path().join("qdc_cal.csv"), "h\n").unwrap();
        std::fs::write(dir.path().join("tdc_cal.csv"), "h\n").unwrap();
        std::fs::write(dir.path().join("board_mapping.json"), "{}").unwrap();
        assert!(config.get_calibration_tables().is_ok());
        assert!(config.get_board_mapping().is_ok());

        let (digi, clusters) = config.get_output_files().unwrap();
        assert_eq!(digi, dir.path().join("run_000042_digi.csv"));
        assert_eq!(clusters, Some(dir.path().join("run_000042_clusters.csv")));
        config.make_clusters = false;
        assert_eq!(config.get_output_files().unwrap().1, None);
    }

    #[test]
    fn test_event_window() {
        let config = Config {
            first_event: 10,
            n_events: Some(2),
            ..Default::default()
        };
        assert!(!config.is_event_selected(9, 0));
        assert!(config.is_event_selected(10, 0));
        assert!(config.is_event_selected(11, 1));
        assert!(!config.is_event_selected(12, 2));
    }
}
