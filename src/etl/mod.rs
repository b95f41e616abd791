pub mod decoder;
pub mod engine_db;
pub mod extractor;
pub mod store;
pub mod supervisor;

pub use decoder::{decode_fee_log, DecodedFee, FeesCollected, FEES_COLLECTED_SIGNATURE};
pub use engine_db::{EngineDb, EngineDbConfig};
pub use extractor::{
    AlloyChainClient, ChainClient, RangeScanner, RetryPolicy, ScanState, ScanStatus, ScanWindow,
};
pub use store::{CheckpointStore, EventStore, FeeEvent, FeeEventQuery};
pub use supervisor::ScannerSupervisor;
