use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    areas::AreaStats,
    config::{FailurePolicy, MatchMode},
    engine::PartitionStat,
    error::AnalyticsError,
    record::Year,
};

/// Las cuatro series por año. `None` en una media = "sin datos".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub salary_all: BTreeMap<Year, Option<f64>>,
    pub count_all: BTreeMap<Year, u64>,
    pub salary_filtered: BTreeMap<Year, Option<f64>>,
    pub count_filtered: BTreeMap<Year, u64>,
}

impl AggregateResult {
    pub fn years(&self) -> impl Iterator<Item = Year> + '_ {
        self.count_all.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.count_all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count_all.is_empty()
    }

    fn insert(&mut self, stat: &PartitionStat) {
        self.salary_all.insert(stat.year, stat.avg_salary_all);
        self.count_all.insert(stat.year, stat.count_all);
        self.salary_filtered.insert(stat.year, stat.avg_salary_filtered);
        self.count_filtered.insert(stat.year, stat.count_filtered);
    }
}

/// Une las estadísticas de todas las particiones en un `AggregateResult`.
///
/// Cada año sale de una sola partición, así que la unión es disjunta y el orden
/// de entrada no importa. Si dos particiones traen el mismo año se devuelve
/// `InvariantViolation` y ningún resultado.
pub fn merge_stats<'a, I>(stats: I) -> Result<AggregateResult, AnalyticsError>
where
    I: IntoIterator<Item = (&'a Path, &'a PartitionStat)>,
{
    let mut seen: BTreeMap<Year, &Path> = BTreeMap::new();
    let mut result = AggregateResult::default();

    for (path, stat) in stats {
        if let Some(first) = seen.insert(stat.year, path) {
            // orden estable en el mensaje, independiente del orden de llegada
            let (first, second) = if first <= path { (first, path) } else { (path, first) };
            return Err(AnalyticsError::InvariantViolation {
                year: stat.year,
                first: first.to_path_buf(),
                second: second.to_path_buf(),
            });
        }
        result.insert(stat);
    }

    Ok(result)
}

/// Estados de una tarea de partición.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Cómo terminó cada archivo de la corrida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub path: PathBuf,
    pub state: TaskState,
    pub year: Option<Year>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Completeness {
    /// Todas las particiones se procesaron.
    Complete,
    /// Alguna partición se omitió (política skip-and-warn).
    Partial,
}

/// Informe de una corrida del agregador.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub input_dir: PathBuf,
    pub keyword: String,
    pub match_mode: MatchMode,
    pub workers: usize,
    pub policy: FailurePolicy,

    pub completeness: Completeness,
    pub tasks: Vec<TaskRecord>,

    pub result: AggregateResult,
    pub areas: AreaStats,
}

impl AnalyticsReport {
    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|t| t.state == TaskState::Completed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|t| t.state == TaskState::Failed)
    }

    /// Vuelca el informe como JSON, creando el directorio padre si hace falta.
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}
