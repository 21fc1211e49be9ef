use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{
    areas::AreaPartials,
    config::KeywordFilter,
    error::{AnalyticsError, ReadError, SchemaError},
    partition,
    record::{self, Record, Year},
};

/// Acumulador de salarios de un subconjunto de vacantes.
/// `count` cuenta todas las filas; `salaried` sólo las que tienen ambos extremos del salario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SalaryAcc {
    pub count: u64,
    pub salaried: u64,
    pub salary_sum: f64,
}

impl SalaryAcc {
    pub fn add(&mut self, rec: &Record) {
        self.count += 1;
        if let Some(mid) = rec.salary_midpoint() {
            self.salaried += 1;
            self.salary_sum += mid;
        }
    }

    pub fn merge(&mut self, other: &SalaryAcc) {
        self.count += other.count;
        self.salaried += other.salaried;
        self.salary_sum += other.salary_sum;
    }

    /// Media de los puntos medios. `None` = "sin datos", nunca 0.
    pub fn mean(&self) -> Option<f64> {
        (self.salaried > 0).then(|| self.salary_sum / self.salaried as f64)
    }
}

/// Estadística de una partición: (año, media total, conteo total, media filtrada, conteo filtrado).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStat {
    pub year: Year,
    pub avg_salary_all: Option<f64>,
    pub count_all: u64,
    pub avg_salary_filtered: Option<f64>,
    pub count_filtered: u64,
}

impl PartitionStat {
    fn from_accs(year: Year, all: &SalaryAcc, filtered: &SalaryAcc) -> Self {
        Self {
            year,
            avg_salary_all: all.mean(),
            count_all: all.count,
            avg_salary_filtered: filtered.mean(),
            count_filtered: filtered.count,
        }
    }
}

/// Lo que devuelve una tarea de partición completada.
#[derive(Debug, Clone)]
pub struct PartitionOutput {
    pub path: PathBuf,
    pub stat: PartitionStat,
    pub areas: AreaPartials,
}

/// Recorre un archivo de partición completo y calcula su `PartitionStat`.
///
/// El año sale de las filas; todas deben compartirlo. Un archivo sólo con cabecera
/// toma el año del nombre `vacancies_by_<año>.csv`.
/// `is_cancelled` se consulta antes de cada fila.
pub fn scan_partition<C>(
    path: &Path,
    filter: &KeywordFilter,
    is_cancelled: C,
) -> Result<PartitionOutput, AnalyticsError>
where
    C: Fn() -> bool,
{
    let read_err = |source: ReadError| AnalyticsError::PartitionRead {
        path: path.to_path_buf(),
        source,
    };

    let reader = record::open_records(path).map_err(read_err)?;

    let mut year: Option<Year> = None;
    let mut all = SalaryAcc::default();
    let mut filtered = SalaryAcc::default();
    let mut areas = AreaPartials::default();

    for (idx, item) in reader.enumerate() {
        if is_cancelled() {
            return Err(AnalyticsError::Cancelled);
        }

        let rec = item.map_err(read_err)?;
        // fila 1 = cabecera
        let row = idx as u64 + 2;
        let rec_year = rec.year().ok_or_else(|| {
            read_err(
                SchemaError::Year {
                    row,
                    value: rec.published_at.clone(),
                }
                .into(),
            )
        })?;

        match year {
            None => year = Some(rec_year),
            Some(expected) if expected != rec_year => {
                return Err(read_err(
                    SchemaError::MixedYears {
                        row,
                        expected,
                        found: rec_year,
                    }
                    .into(),
                ));
            }
            Some(_) => {}
        }

        all.add(&rec);
        if filter.matches(&rec.name) {
            filtered.add(&rec);
        }
        areas.add(&rec);
    }

    let year = match year {
        Some(y) => y,
        None => partition::year_from_file_name(path)
            .ok_or_else(|| read_err(SchemaError::UnknownYear(path.to_path_buf()).into()))?,
    };

    debug!(
        "partición {} ({}): {} vacantes, {} filtradas",
        path.display(),
        year,
        all.count,
        filtered.count
    );

    Ok(PartitionOutput {
        path: path.to_path_buf(),
        stat: PartitionStat::from_accs(year, &all, &filtered),
        areas,
    })
}
