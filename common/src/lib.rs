//! Núcleo de vacstats: modelo de datos, códec CSV de particiones, cálculo por
//! partición y merge de resultados. Sin runtime async: eso vive en `worker`.

pub mod areas;
pub mod config;
pub mod engine;
pub mod error;
pub mod partition;
pub mod record;
pub mod results;

pub use areas::{AreaPartials, AreaStats};
pub use config::{AnalyticsConfig, FailurePolicy, KeywordFilter, MatchMode};
pub use engine::{PartitionOutput, PartitionStat, SalaryAcc};
pub use error::{AnalyticsError, ReadError, SchemaError};
pub use partition::{FailedPartition, PartitionReport, WrittenPartition};
pub use record::{Record, Year};
pub use results::{AggregateResult, AnalyticsReport, Completeness, TaskRecord, TaskState};
