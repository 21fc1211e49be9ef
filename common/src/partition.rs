use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use crate::{
    error::{AnalyticsError, SchemaError},
    record::{self, Record, Year},
};

pub const PARTITION_PREFIX: &str = "vacancies_by_";
pub const PARTITION_EXT: &str = "csv";

/// `vacancies_by_<año>.csv`
pub fn partition_file_name(year: Year) -> String {
    format!("{PARTITION_PREFIX}{year}.{PARTITION_EXT}")
}

pub fn partition_path(dir: &Path, year: Year) -> PathBuf {
    dir.join(partition_file_name(year))
}

/// Inverso de `partition_file_name`; `None` si el nombre no sigue la convención.
pub fn year_from_file_name(path: &Path) -> Option<Year> {
    let name = path.file_name()?.to_str()?;
    let year = name
        .strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(PARTITION_EXT)?
        .strip_suffix('.')?;
    Year::parse(year)
}

/// Agrupa registros por año. Si algún registro no tiene año válido, no se agrupa nada.
///
/// Las filas se numeran como en el CSV de origen: la 1 es la cabecera.
pub fn group_by_year(records: Vec<Record>) -> Result<BTreeMap<Year, Vec<Record>>, SchemaError> {
    let mut groups: BTreeMap<Year, Vec<Record>> = BTreeMap::new();

    for (idx, rec) in records.into_iter().enumerate() {
        let Some(year) = rec.year() else {
            return Err(SchemaError::Year {
                row: idx as u64 + 2,
                value: rec.published_at,
            });
        };
        groups.entry(year).or_default().push(rec);
    }

    Ok(groups)
}

/// Escribe una partición completa sin que nadie pueda ver el archivo a medias:
/// primero a un temporal oculto del mismo directorio, luego `rename` sobre el nombre final.
pub fn write_partition(dir: &Path, year: Year, records: &[Record]) -> io::Result<PathBuf> {
    let final_path = partition_path(dir, year);
    let tmp_path = dir.join(format!(
        ".{}.{}.tmp",
        partition_file_name(year),
        uuid::Uuid::new_v4()
    ));

    let written = (|| -> io::Result<()> {
        let file = File::create(&tmp_path)?;
        let writer = record::write_records(BufWriter::new(file), records)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    Ok(final_path)
}

/// Lista los archivos de partición de un directorio. El orden no está garantizado.
pub fn list_partitions(dir: &Path) -> Result<Vec<PathBuf>, AnalyticsError> {
    // el directorio tiene que existir y poder leerse; glob sólo ignoraría el error
    fs::read_dir(dir).map_err(|source| AnalyticsError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    // sólo el directorio se escapa; el comodín es el del nombre
    let escaped_dir = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = Path::new(&escaped_dir).join(format!("{PARTITION_PREFIX}*.{PARTITION_EXT}"));

    let mut out = Vec::new();
    for entry in glob::glob(&pattern.to_string_lossy())? {
        match entry {
            Ok(path) if path.is_file() => out.push(path),
            Ok(_) => {}
            Err(e) => {
                return Err(AnalyticsError::Io {
                    path: e.path().to_path_buf(),
                    source: e.into(),
                })
            }
        }
    }
    Ok(out)
}

/// Partición escrita correctamente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrittenPartition {
    pub year: Year,
    pub path: PathBuf,
    pub records: usize,
}

/// Partición que no se pudo escribir, con el motivo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPartition {
    pub year: Year,
    pub path: PathBuf,
    pub error: String,
}

/// Resultado del particionado: qué años quedaron escritos y cuáles fallaron.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub out_dir: PathBuf,
    pub written: Vec<WrittenPartition>,
    pub failed: Vec<FailedPartition>,
}

impl PartitionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total_records(&self) -> usize {
        self.written.iter().map(|p| p.records).sum()
    }

    pub fn record_failure(&mut self, year: Year, err: &AnalyticsError) {
        self.failed.push(FailedPartition {
            year,
            path: partition_path(&self.out_dir, year),
            error: err.to_string(),
        });
    }
}
