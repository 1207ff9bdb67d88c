pub mod archive;
pub mod buffer;
pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod mqtt;
pub mod period;
pub mod rollup;
pub mod source;
pub mod store;
pub mod summary;
pub mod telemetry;

pub use archive::{ArchiveStore, HistoryRange, RangeArchive};
pub use buffer::AggregationBuffer;
pub use collector::{CollectionController, CollectorStatus, LiveView};
pub use config::Config;
pub use error::{AppError, Result};
pub use period::Granularity;
pub use rollup::{FlushReport, RollupScheduler};
pub use source::{ChannelTelemetrySource, TelemetrySource};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use telemetry::{UnitSnapshot, UnitsSnapshot};
