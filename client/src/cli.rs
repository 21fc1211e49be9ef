use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use common::{
    AnalyticsConfig, AnalyticsReport, FailurePolicy, MatchMode, PartitionReport, Year,
};
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};
use tracing::info;
use worker::PipelineReport;

#[derive(Parser)]
#[command(name = "vacstats")]
#[command(about = "Estadísticas de vacantes por año: particiona el dataset y lo agrega en paralelo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Divide el CSV fuente en un vacancies_by_<año>.csv por año
    Split {
        #[arg(value_name = "CSV")]
        input: PathBuf,

        /// Directorio donde se escriben las particiones
        #[arg(long, default_value = "split_files")]
        out_dir: PathBuf,
    },
    /// Agrega las particiones de un directorio
    Analyze {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        #[command(flatten)]
        opts: AnalyzeOpts,
    },
    /// split + analyze en una sola corrida
    Run {
        #[arg(value_name = "CSV")]
        input: PathBuf,

        #[arg(long, default_value = "split_files")]
        out_dir: PathBuf,

        #[command(flatten)]
        opts: AnalyzeOpts,
    },
}

#[derive(Args)]
struct AnalyzeOpts {
    /// Palabra clave buscada en el nombre de la vacante (VACSTATS_KEYWORD)
    #[arg(long)]
    keyword: Option<String>,

    /// Tamaño del pool (VACSTATS_WORKERS; por defecto, núcleos del host)
    #[arg(long)]
    workers: Option<usize>,

    /// fail-fast o skip-and-warn (VACSTATS_FAILURE_POLICY)
    #[arg(long, value_name = "POLITICA")]
    policy: Option<String>,

    /// Compara la palabra clave sin distinguir mayúsculas
    #[arg(long)]
    ignore_case: bool,

    /// Además de la tabla, guarda el informe completo como JSON
    #[arg(long, value_name = "ARCHIVO")]
    json: Option<PathBuf>,
}

impl AnalyzeOpts {
    /// Env vars como base, flags por encima.
    fn to_config(&self, dir: &Path) -> Result<AnalyticsConfig> {
        let mut config = AnalyticsConfig::from_env(dir)?;
        if let Some(keyword) = &self.keyword {
            config.keyword = keyword.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(policy) = &self.policy {
            config.policy = policy.parse::<FailurePolicy>()?;
        }
        if self.ignore_case {
            config.match_mode = MatchMode::CaseInsensitive;
        }
        config.validate()?;
        Ok(config)
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Split { input, out_dir } => {
            let report = split(&input, &out_dir).await?;

            print!("{}", render_partitions(&report));
            if !report.is_complete() {
                bail!("{} particiones no se escribieron", report.failed.len());
            }
        }
        Commands::Analyze { dir, opts } => {
            let config = opts.to_config(&dir)?;
            let report = worker::run_aggregation(&config).await?;

            print!("{}", render_analytics(&report));
            if let Some(path) = &opts.json {
                report
                    .write_json(path)
                    .with_context(|| format!("no se pudo escribir {}", path.display()))?;
                info!("informe JSON en {}", path.display());
            }
        }
        Commands::Run {
            input,
            out_dir,
            opts,
        } => {
            let config = opts.to_config(&out_dir)?;
            let report = worker::split_and_aggregate(&input, &config).await?;

            print!("{}", render_partitions(&report.partitions));
            println!();
            print!("{}", render_analytics(&report.analytics));
            if let Some(path) = &opts.json {
                write_pipeline_json(&report, path)?;
                info!("informe JSON en {}", path.display());
            }
            if !report.partitions.is_complete() {
                bail!(
                    "{} particiones no se escribieron; resultado parcial",
                    report.partitions.failed.len()
                );
            }
        }
    }

    Ok(())
}

/// Lee el CSV fuente fuera del runtime y lo particiona por año.
async fn split(input: &Path, out_dir: &Path) -> Result<PartitionReport> {
    let path = input.to_path_buf();
    let records = tokio::task::spawn_blocking(move || common::record::read_records(&path))
        .await?
        .with_context(|| format!("no se pudo leer {}", input.display()))?;
    Ok(worker::write_partitions(records, out_dir).await?)
}

fn write_pipeline_json(report: &PipelineReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json + "\n").with_context(|| format!("no se pudo escribir {}", path.display()))
}

fn render_partitions(report: &PartitionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Particiones en {}:", report.out_dir.display());
    for p in &report.written {
        let _ = writeln!(out, "  {}  {:>8} registros  {}", p.year, p.records, p.path.display());
    }
    for p in &report.failed {
        let _ = writeln!(out, "  {}  FALLÓ: {}", p.year, p.error);
    }
    let _ = writeln!(
        out,
        "  total: {} registros en {} archivos",
        report.total_records(),
        report.written.len()
    );
    out
}

fn fmt_salary(avg: Option<f64>) -> String {
    match avg {
        Some(v) => format!("{:.0}", v),
        None => "sin datos".to_string(),
    }
}

fn render_analytics(report: &AnalyticsReport) -> String {
    let r = &report.result;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Corrida {} sobre {} ({} workers, {})",
        report.run_id,
        report.input_dir.display(),
        report.workers,
        report.policy
    );
    let _ = writeln!(out, "Palabra clave: {:?} ({:?})", report.keyword, report.match_mode);
    let _ = writeln!(
        out,
        "{:<6} {:>12} {:>10} {:>14} {:>12}",
        "año", "salario", "vacantes", "salario clave", "vacantes clave"
    );

    let years: Vec<Year> = r.years().collect();
    if years.is_empty() {
        let _ = writeln!(out, "  (sin particiones)");
    }
    for year in years {
        let _ = writeln!(
            out,
            "{:<6} {:>12} {:>10} {:>14} {:>12}",
            year.to_string(),
            fmt_salary(r.salary_all.get(&year).copied().flatten()),
            r.count_all.get(&year).copied().unwrap_or_default(),
            fmt_salary(r.salary_filtered.get(&year).copied().flatten()),
            r.count_filtered.get(&year).copied().unwrap_or_default(),
        );
    }

    if !report.areas.salary_by_area.is_empty() {
        let _ = writeln!(out, "\nSalario medio por ciudad:");
        for (area, salary) in &report.areas.salary_by_area {
            let _ = writeln!(out, "  {:<30} {:>10.0}", area, salary);
        }
        let _ = writeln!(out, "Cuota de vacantes por ciudad:");
        for (area, share) in &report.areas.share_by_area {
            let _ = writeln!(out, "  {:<30} {:>10.4}", area, share);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Particiones procesadas: {}", report.succeeded().count());
    for task in report.failed() {
        let _ = writeln!(
            out,
            "Partición omitida: {} ({})",
            task.path.display(),
            task.error.as_deref().unwrap_or("error desconocido")
        );
    }
    let _ = writeln!(
        out,
        "Resultado: {}",
        if report.is_complete() { "COMPLETO" } else { "PARCIAL" }
    );
    out
}
