//! Ejecución concurrente: particionado por año, pool acotado de agregación y
//! la corrida completa `split` + `analyze`.

pub mod partitioner;
pub mod pipeline;
pub mod pool;

pub use partitioner::write_partitions;
pub use pipeline::{split_and_aggregate, PipelineReport};
pub use pool::{run_aggregation, run_aggregation_over};
