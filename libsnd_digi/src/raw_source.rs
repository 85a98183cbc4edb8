use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use super::error::RawSourceError;
use super::hardware_id::board_id_from_name;

const EVENT_ENTRIES_PER_LINE: usize = 2; //event, timestamp
const HIT_ENTRIES_PER_LINE: usize = 8; //event, tofpet_id, tofpet_channel, tac, t_coarse, t_fine, v_coarse, v_fine
const EVENT_FILE_NAME: &str = "events.csv";
const BOARD_FILE_PREFIX: &str = "board_";
const BOARD_FILE_SUFFIX: &str = ".csv";

/// One front-end reading from a tofpet ASIC.
///
/// - tac: 0-3, which time-to-analogue converter was used (each calibrated separately)
/// - t_coarse: coarse timestamp, running at 4x the LHC clock
/// - t_fine: 0-1023, raw fine time, needs calibration
/// - v_coarse: 0-1023, number of clock cycles the charge integration lasted
/// - v_fine: 0-1023, raw charge, needs calibration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawHit {
    pub tofpet_id: u8,
    pub tofpet_channel: u8,
    pub tac: u8,
    pub t_coarse: i64,
    pub t_fine: u16,
    pub v_coarse: u16,
    pub v_fine: u16,
}

/// All raw hits of one event, grouped by board name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    pub event_number: u64,
    pub timestamp: f64,
    pub boards: BTreeMap<String, Vec<RawHit>>,
}

impl RawEvent {
    pub fn new(event_number: u64, timestamp: f64) -> Self {
        Self {
            event_number,
            timestamp,
            boards: BTreeMap::new(),
        }
    }

    pub fn n_hits(&self) -> usize {
        self.boards.values().map(Vec::len).sum()
    }
}

/// Anything that can hand out raw events in increasing event order
pub trait RawHitSource {
    /// Get the next event. Returns None when the source is exhausted
    fn next_event(&mut self) -> Result<Option<RawEvent>, RawSourceError>;
}

impl RawHitSource for VecDeque<RawEvent> {
    fn next_event(&mut self) -> Result<Option<RawEvent>, RawSourceError> {
        Ok(self.pop_front())
    }
}

/// Raw data dumped as CSV: one `events.csv` plus one `board_<id>.csv` per board.
///
/// The whole run is read into memory when the source is opened.
#[derive(Debug)]
pub struct CsvRawSource {
    events: VecDeque<RawEvent>,
    pub total_size_bytes: u64,
    parent_path: PathBuf,
}

fn parse_fields<'a>(
    line: &'a str,
    expected: usize,
    file: &str,
) -> Result<Vec<&'a str>, RawSourceError> {
    let entries: Vec<&str> = line.split_terminator(',').map(str::trim).collect();
    if entries.len() != expected {
        return Err(RawSourceError::BadFileFormat(format!(
            "{file}: expected {expected} columns, found {} in line '{line}'",
            entries.len()
        )));
    }
    Ok(entries)
}

fn parse_int<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    entry: &str,
    file: &str,
) -> Result<T, RawSourceError> {
    entry.parse().map_err(|source| RawSourceError::ParsingError {
        file: file.to_string(),
        source,
    })
}

impl CsvRawSource {
    /// Open the raw data of a run directory
    pub fn new(path: &Path) -> Result<Self, RawSourceError> {
        let event_path = path.join(EVENT_FILE_NAME);
        if !event_path.exists() {
            return Err(RawSourceError::BadFilePath(event_path));
        }

        let board_files = Self::get_board_files(path)?;
        let mut total_size_bytes = event_path.metadata()?.len();
        for (_, p) in board_files.iter() {
            total_size_bytes += p.metadata()?.len();
        }

        let mut events: BTreeMap<u64, RawEvent> = BTreeMap::new();
        let contents = std::fs::read_to_string(&event_path)?;
        for line in contents.lines().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let entries = parse_fields(line, EVENT_ENTRIES_PER_LINE, EVENT_FILE_NAME)?;
            let event_number: u64 = parse_int(entries[0], EVENT_FILE_NAME)?;
            let timestamp: f64 = entries[1].parse().map_err(|_| {
                RawSourceError::BadFileFormat(format!(
                    "{EVENT_FILE_NAME}: bad timestamp '{}'",
                    entries[1]
                ))
            })?;
            let mut event = RawEvent::new(event_number, timestamp);
            for (board, _) in board_files.iter() {
                event.boards.insert(board.clone(), Vec::new());
            }
            events.insert(event_number, event);
        }

        for (board, board_path) in board_files.iter() {
            let file = board_path.to_string_lossy();
            let contents = std::fs::read_to_string(board_path)?;
            for line in contents.lines().skip(1) {
                if line.trim().is_empty() {
                    continue;
                }
                let entries = parse_fields(line, HIT_ENTRIES_PER_LINE, &file)?;
                let event_number: u64 = parse_int(entries[0], &file)?;
                let hit = RawHit {
                    tofpet_id: parse_int(entries[1], &file)?,
                    tofpet_channel: parse_int(entries[2], &file)?,
                    tac: parse_int(entries[3], &file)?,
                    t_coarse: parse_int(entries[4], &file)?,
                    t_fine: parse_int(entries[5], &file)?,
                    v_coarse: parse_int(entries[6], &file)?,
                    v_fine: parse_int(entries[7], &file)?,
                };
                match events.get_mut(&event_number) {
                    Some(event) => event.boards.entry(board.clone()).or_default().push(hit),
                    None => log::warn!(
                        "Hit on {board} refers to event {event_number} which is not in {EVENT_FILE_NAME}; dropping it"
                    ),
                }
            }
        }

        Ok(Self {
            events: events.into_values().collect(),
            total_size_bytes,
            parent_path: path.to_path_buf(),
        })
    }

    /// Find all board files in the run directory, sorted by board name
    fn get_board_files(parent_path: &Path) -> Result<Vec<(String, PathBuf)>, RawSourceError> {
        let mut board_files: Vec<(String, PathBuf)> = Vec::new();
        for item in parent_path.read_dir()? {
            let item_path = item?.path();
            let Some(file_name) = item_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(board) = file_name
                .strip_suffix(BOARD_FILE_SUFFIX)
                .filter(|b| b.starts_with(BOARD_FILE_PREFIX))
            {
                board_id_from_name(board)?;
                board_files.push((board.to_string(), item_path.clone()));
            }
        }

        if board_files.is_empty() {
            return Err(RawSourceError::NoBoardFiles);
        }
        board_files.sort();
        Ok(board_files)
    }

    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    pub fn get_parent_path(&self) -> &Path {
        &self.parent_path
    }
}

impl RawHitSource for CsvRawSource {
    fn next_event(&mut self) -> Result<Option<RawEvent>, RawSourceError> {
        Ok(self.events.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_csv_source() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "events.csv", "event,timestamp\n0,100\n1,250.5\n");
        write(
            dir.path(),
            "board_11.csv",
            "event,tofpet_id,tofpet_channel,tac,t_coarse,t_fine,v_coarse,v_fine\n\
             0,1,2,3,1000,10,20,30\n1,4,5,0,2000,11,21,31\n1,4,6,0,2000,12,22,32\n7,0,0,0,0,0,0,0\n",
        );
        write(dir.path(), "board_2.csv", "header\n");
        write(dir.path(), "notes.txt", "ignored");

        let mut source = CsvRawSource::new(dir.path()).unwrap();
        assert_eq!(source.n_events(), 2);
        assert!(source.total_size_bytes > 0);

        let event = source.next_event().unwrap().unwrap();
        assert_eq!(event.event_number, 0);
        assert_eq!(event.timestamp, 100.0);
        assert_eq!(
            event.boards.keys().collect::<Vec<_>>(),
            vec!["board_11", "board_2"]
        );
        assert_eq!(
            event.boards["board_11"],
            vec![RawHit {
                tofpet_id: 1,
                tofpet_channel: 2,
                tac: 3,
                t_coarse: 1000,
                t_fine: 10,
                v_coarse: 20,
                v_fine: 30,
            }]
        );
        assert!(event.boards["board_2"].is_empty());

        let event = source.next_event().unwrap().unwrap();
        assert_eq!(event.event_number, 1);
        assert_eq!(event.n_hits(), 2);
        assert!(source.next_event().unwrap().is_none());
    }

    #[test]
    fn test_missing_event_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "board_1.csv", "header\n");
        assert!(matches!(
            CsvRawSource::new(dir.path()),
            Err(RawSourceError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_no_board_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "events.csv", "event,timestamp\n0,1\n");
        assert!(matches!(
            CsvRawSource::new(dir.path()),
            Err(RawSourceError::NoBoardFiles)
        ));
    }

    #[test]
    fn test_bad_row() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "events.csv", "event,timestamp\n0,1\n");
        write(dir.path(), "board_1.csv", "header\n0,1,2\n");
        assert!(matches!(
            CsvRawSource::new(dir.path()),
            Err(RawSourceError::BadFileFormat(_))
        ));
    }
}
