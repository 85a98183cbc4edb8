/// Progress message sent from the run loop to whoever is watching it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub events_processed: u64,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, events_processed: u64) -> Self {
        Self {
            progress,
            run_number,
            events_processed,
        }
    }
}
