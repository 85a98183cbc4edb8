use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::digi_hit::DigiEvent;
use super::error::WriterError;

const DIGI_HEADER: &str = "event,detector,detector_id,slot,charge,time,valid,unmapped";
const CLUSTER_HEADER: &str = "event,first,n";
const SCIFI_NAME: &str = "scifi";
const MUFILTER_NAME: &str = "mufilter";

/// Writes digitized events as flat CSV.
///
/// One row per filled slot goes to the digi file; `unmapped` marks MuFilter slots that were
/// addressed through the unmapped-SiPM sentinel. Clusters, when requested, go to a
/// separate file with one row per cluster.
#[derive(Debug)]
pub struct DigiWriter {
    digi_file: BufWriter<File>,
    cluster_file: Option<BufWriter<File>>,
    digi_path: PathBuf,
    events_written: u64,
}

impl DigiWriter {
    /// Create the writer. `cluster_path` is None if clustering is disabled
    pub fn new(digi_path: &Path, cluster_path: Option<&Path>) -> Result<Self, WriterError> {
        let mut digi_file = BufWriter::new(File::create(digi_path)?);
        writeln!(digi_file, "{DIGI_HEADER}")?;
        let cluster_file = match cluster_path {
            Some(p) => {
                let mut file = BufWriter::new(File::create(p)?);
                writeln!(file, "{CLUSTER_HEADER}")?;
                Some(file)
            }
            None => None,
        };
        Ok(Self {
            digi_file,
            cluster_file,
            digi_path: digi_path.to_path_buf(),
            events_written: 0,
        })
    }

    pub fn write_event(&mut self, event: &DigiEvent) -> Result<(), WriterError> {
        let number = event.header.event_number;
        for (id, hit) in event.scifi.iter() {
            writeln!(
                self.digi_file,
                "{number},{SCIFI_NAME},{id},0,{},{},{},0",
                hit.charge,
                hit.time,
                hit.is_valid() as u8
            )?;
        }
        for (id, hit) in event.mufilter.iter() {
            for slot in 0..hit.n_slots() {
                if !hit.is_filled(slot) {
                    continue;
                }
                writeln!(
                    self.digi_file,
                    "{number},{MUFILTER_NAME},{id},{slot},{},{},{},{}",
                    hit.signal(slot),
                    hit.time(slot),
                    !hit.is_masked(slot) as u8,
                    hit.is_unmapped(slot) as u8
                )?;
            }
        }
        if let (Some(file), Some(clusters)) =
            (self.cluster_file.as_mut(), event.clusters.as_ref())
        {
            for cluster in clusters.iter() {
                writeln!(file, "{number},{},{}", cluster.first, cluster.n)?;
            }
        }
        self.events_written += 1;
        Ok(())
    }

    pub fn get_events_written(&self) -> u64 {
        self.events_written
    }

    pub fn get_digi_path(&self) -> &Path {
        &self.digi_path
    }

    /// Flush everything to disk
    pub fn close(mut self) -> Result<(), WriterError> {
        self.digi_file.flush()?;
        if let Some(file) = self.cluster_file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::make_clusters;
    use crate::digi_hit::{MuFilterHit, ScifiHit, SlotDigi};

    #[test]
    fn test_write_event() {
        let dir = tempfile::tempdir().unwrap();
        let digi_path = dir.path().join("digi.csv");
        let cluster_path = dir.path().join("clusters.csv");

        let mut event = DigiEvent::default();
        event.header.event_number = 3;
        let mut hit = ScifiHit::new(1_000_001);
        hit.set_digi(2.5, 10.0);
        event.scifi.insert(1_000_001, hit);
        let mut bar = MuFilterHit::new(20_009, 8, 2);
        bar.set_digi(
            9,
            SlotDigi {
                charge: -4.0,
                time: 11.0,
                masked: true,
                unmapped: false,
            },
        )
        .unwrap();
        // written slots are kept even when both values are zero
        bar.set_digi(2, SlotDigi::default()).unwrap();
        bar.set_digi(
            12,
            SlotDigi {
                charge: 7.5,
                time: 3.0,
                masked: true,
                unmapped: true,
            },
        )
        .unwrap();
        event.mufilter.insert(20_009, bar);
        event.clusters = Some(make_clusters(&event.scifi));

        let mut writer = DigiWriter::new(&digi_path, Some(&cluster_path)).unwrap();
        writer.write_event(&event).unwrap();
        assert_eq!(writer.get_events_written(), 1);
        writer.close().unwrap();

        let digi = std::fs::read_to_string(&digi_path).unwrap();
        let lines: Vec<&str> = digi.lines().collect();
        assert_eq!(
            lines,
            vec![
                DIGI_HEADER,
                "3,scifi,1000001,0,2.5,10,1,0",
                "3,mufilter,20009,2,0,0,1,0",
                "3,mufilter,20009,9,-4,11,0,0",
                "3,mufilter,20009,12,7.5,3,0,1"
            ]
        );
        let clusters = std::fs::read_to_string(&cluster_path).unwrap();
        assert_eq!(clusters.lines().collect::<Vec<_>>(), vec![CLUSTER_HEADER, "3,1000001,1"]);
    }
}
