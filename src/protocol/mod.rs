//! Runner ⇄ tool wire protocol.
//!
//! One JSON document per line. After connecting, the tool sends its name
//! (`Init`); from then on the runner sends [`GenerationRequest`]s and the tool
//! answers every `BenchmarkRequest` with exactly one [`GenerationResult`].

mod channel;

pub use channel::{ClientConnection, LineChannel, ServerConnection, ToolServer};

use crate::model::{Benchmark, TestSuite};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRequest {
    pub benchmark: Benchmark,
    #[serde(with = "millis")]
    pub time_limit: Duration,
    pub output_directory: PathBuf,
}

/// Runner → tool messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GenerationRequest {
    BenchmarkRequest(BenchmarkRequest),
    StopRequest,
}

/// Tool → runner answer to a `BenchmarkRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GenerationResult {
    #[serde(rename = "SuccessfulGenerationResult", rename_all = "camelCase")]
    Successful {
        test_suite: TestSuite,
        #[serde(with = "millis")]
        generation_time: Duration,
    },
    #[serde(rename = "UnsuccessfulGenerationResult", rename_all = "camelCase")]
    Unsuccessful {
        reason: String,
        #[serde(with = "millis")]
        generation_time: Duration,
    },
}

impl GenerationResult {
    pub fn generation_time(&self) -> Duration {
        match self {
            Self::Successful {
                generation_time, ..
            }
            | Self::Unsuccessful {
                generation_time, ..
            } => *generation_time,
        }
    }
}

/// Durations travel as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
