pub mod analyzer;
pub mod copy_engine;
#[cfg(any(test, feature = "testing"))]
pub mod memory_store;
pub mod notify;
pub mod object_store;
pub mod orchestrator;
pub mod payer_directory;
pub mod retry;
pub mod trigger;
pub mod watermark;

pub use analyzer::SyncAnalyzer;
pub use copy_engine::{CopyEngine, CopyOutcome, PayerCopyBatch};
pub use object_store::{ObjectStore, S3Gateway, S3Settings};
pub use orchestrator::{Orchestrator, SyncSettings};
pub use payer_directory::{PayerConfigSource, PayerDirectory, SqlPayerConfigSource};
pub use retry::RetryPolicy;
pub use trigger::{DisabledTrigger, DownstreamTrigger, HttpTrigger, MaterializationRequest};
pub use watermark::{SqlWatermarkConnector, WatermarkConnector, WatermarkStore};
