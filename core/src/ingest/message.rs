use serde::{Deserialize, Serialize};

/// Work item carried by the shared queue.
///
/// Encoded as JSON tagged by `kind`, e.g.
/// `{"kind":"file_processing","station_id":"st-1","location":"scans/st-1/a.bin","upload_succeeded":true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMessage {
    FileProcessing {
        station_id: String,
        location: String,
        upload_succeeded: bool,
    },
    RetentionSweep,
    SharedAccessRefresh,
    StationAvailabilityCheck,
    HealthMonitoringCheck,
}

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message field {0} is empty")]
    EmptyField(&'static str),
}

impl WorkerMessage {
    pub fn decode(body: &str) -> Result<Self, MessageError> {
        let message: WorkerMessage = serde_json::from_str(body)?;
        if let WorkerMessage::FileProcessing {
            station_id,
            location,
            ..
        } = &message
        {
            if station_id.trim().is_empty() {
                return Err(MessageError::EmptyField("station_id"));
            }
            if location.trim().is_empty() {
                return Err(MessageError::EmptyField("location"));
            }
        }
        Ok(message)
    }

    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::FileProcessing { .. } => "file_processing",
            WorkerMessage::RetentionSweep => "retention_sweep",
            WorkerMessage::SharedAccessRefresh => "shared_access_refresh",
            WorkerMessage::StationAvailabilityCheck => "station_availability_check",
            WorkerMessage::HealthMonitoringCheck => "health_monitoring_check",
        }
    }
}
