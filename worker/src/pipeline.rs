use common::{
    record, AnalyticsConfig, AnalyticsError, AnalyticsReport, Completeness, FailurePolicy,
    PartitionReport,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::{partitioner, pool};

/// Informe de `split` + `analyze` en una sola corrida.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub partitions: PartitionReport,
    pub analytics: AnalyticsReport,
}

/// Particiona `source` en `config.input_dir` y, cuando todas las escrituras
/// terminaron, corre el agregador sobre las particiones escritas en esta
/// corrida. Otros `vacancies_by_*.csv` que ya hubiera en el directorio no
/// entran en el resultado.
///
/// Si alguna partición no se pudo escribir: con `FailFast` no se agrega nada;
/// con `SkipAndWarn` se agrega lo que hay y el informe queda `Partial`.
pub async fn split_and_aggregate(
    source: &Path,
    config: &AnalyticsConfig,
) -> Result<PipelineReport, AnalyticsError> {
    config.validate()?;

    let path = source.to_path_buf();
    let records = tokio::task::spawn_blocking(move || record::read_records(&path))
        .await
        .map_err(|e| AnalyticsError::TaskPanicked {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?
        .map_err(|e| AnalyticsError::SourceRead {
            path: source.to_path_buf(),
            source: e,
        })?;
    info!("{} registros leídos de {}", records.len(), source.display());

    // barrera: write_partitions no vuelve hasta que todas las escrituras terminaron
    let partitions = partitioner::write_partitions(records, &config.input_dir).await?;

    if !partitions.is_complete() {
        warn!(
            "{} particiones no se escribieron en {}",
            partitions.failed.len(),
            config.input_dir.display()
        );
        if config.policy == FailurePolicy::FailFast {
            return Err(AnalyticsError::PartitionWritesFailed {
                count: partitions.failed.len(),
                first: partitions.failed[0].year,
            });
        }
    }

    let written = partitions.written.iter().map(|p| p.path.clone()).collect();
    let mut analytics = pool::run_aggregation_over(written, config).await?;
    if !partitions.is_complete() {
        analytics.completeness = Completeness::Partial;
    }

    Ok(PipelineReport {
        partitions,
        analytics,
    })
}
