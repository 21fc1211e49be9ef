use common::{
    partition::{self, PartitionReport, WrittenPartition},
    AnalyticsError, Record,
};
use std::{fs, path::Path};
use tracing::{info, warn};

/// Reparte los registros por año y escribe un `vacancies_by_<año>.csv` por grupo.
///
/// Lanza una tarea de escritura por año sin esperar entre lanzamientos, y sólo
/// devuelve cuando todas terminaron (barrera). Un fallo en un año no afecta al
/// resto: queda en `PartitionReport::failed`.
pub async fn write_partitions(
    records: Vec<Record>,
    out_dir: &Path,
) -> Result<PartitionReport, AnalyticsError> {
    let groups = partition::group_by_year(records)?;

    fs::create_dir_all(out_dir).map_err(|source| AnalyticsError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let mut handles = Vec::with_capacity(groups.len());
    for (year, recs) in groups {
        let dir = out_dir.to_path_buf();
        let handle = tokio::task::spawn_blocking(move || {
            let path = partition::write_partition(&dir, year, &recs)?;
            Ok::<_, std::io::Error>(WrittenPartition {
                year,
                path,
                records: recs.len(),
            })
        });
        handles.push((year, handle));
    }

    info!(
        "lanzadas {} tareas de escritura en {}",
        handles.len(),
        out_dir.display()
    );

    let mut report = PartitionReport {
        out_dir: out_dir.to_path_buf(),
        ..Default::default()
    };

    for (year, handle) in handles {
        match handle.await {
            Ok(Ok(written)) => {
                info!(
                    "partición {} escrita: {} registros en {}",
                    year,
                    written.records,
                    written.path.display()
                );
                report.written.push(written);
            }
            Ok(Err(source)) => {
                let err = AnalyticsError::PartitionWrite {
                    year,
                    path: partition::partition_path(out_dir, year),
                    source,
                };
                warn!("{}", err);
                report.record_failure(year, &err);
            }
            Err(e) => {
                let err = AnalyticsError::TaskPanicked {
                    path: partition::partition_path(out_dir, year),
                    message: e.to_string(),
                };
                warn!("{}", err);
                report.record_failure(year, &err);
            }
        }
    }

    Ok(report)
}
