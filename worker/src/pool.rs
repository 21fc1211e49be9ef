use chrono::Utc;
use common::{
    engine::{self, PartitionOutput},
    partition, results, AnalyticsConfig, AnalyticsError, AnalyticsReport, AreaPartials,
    Completeness, FailurePolicy, TaskRecord, TaskState,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resultado final de una tarea de partición.
#[derive(Debug)]
enum Outcome {
    Completed(PartitionOutput),
    Failed(AnalyticsError),
    Cancelled,
}

/// Corre el agregador sobre todos los `vacancies_by_*.csv` de `config.input_dir`.
///
/// - Una tarea por archivo, como mucho `config.workers` a la vez.
/// - Espera a todas antes de hacer el merge (barrera).
/// - Con `FailFast` el primer fallo cancela lo pendiente y se devuelve ese error.
/// - Con `SkipAndWarn` las particiones fallidas se omiten y el informe queda `Partial`.
/// - Un año repetido entre archivos siempre es fatal.
pub async fn run_aggregation(config: &AnalyticsConfig) -> Result<AnalyticsReport, AnalyticsError> {
    config.validate()?;

    let paths = partition::list_partitions(&config.input_dir)?;
    if paths.is_empty() {
        warn!(
            "no hay particiones vacancies_by_*.csv en {}",
            config.input_dir.display()
        );
    }
    run_aggregation_over(paths, config).await
}

/// Igual que `run_aggregation`, pero sólo sobre `paths`; el resto del
/// directorio no se mira.
pub async fn run_aggregation_over(
    paths: Vec<PathBuf>,
    config: &AnalyticsConfig,
) -> Result<AnalyticsReport, AnalyticsError> {
    config.validate()?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();

    info!(
        "agregación {}: {} particiones, {} workers, política {}",
        run_id,
        paths.len(),
        config.workers,
        config.policy
    );

    let mut outcomes = dispatch(paths, config).await;

    if config.policy == FailurePolicy::FailFast {
        // el primer fallo en orden de despacho es el que se reporta
        let first = outcomes
            .iter()
            .position(|(_, o)| matches!(o, Outcome::Failed(_)));
        if let Some(idx) = first {
            if let (path, Outcome::Failed(err)) = outcomes.swap_remove(idx) {
                warn!("agregación {} abortada por {}: {}", run_id, path.display(), err);
                return Err(err);
            }
        }
    }

    let mut tasks = Vec::with_capacity(outcomes.len());
    let mut completed = Vec::new();

    for (path, outcome) in outcomes {
        match outcome {
            Outcome::Completed(out) => {
                tasks.push(TaskRecord {
                    path,
                    state: TaskState::Completed,
                    year: Some(out.stat.year),
                    error: None,
                });
                completed.push(out);
            }
            Outcome::Failed(err) => {
                warn!("se omite la partición {}: {}", path.display(), err);
                tasks.push(TaskRecord {
                    year: partition::year_from_file_name(&path),
                    path,
                    state: TaskState::Failed,
                    error: Some(err.to_string()),
                });
            }
            Outcome::Cancelled => tasks.push(TaskRecord {
                year: partition::year_from_file_name(&path),
                path,
                state: TaskState::Cancelled,
                error: None,
            }),
        }
    }
    tasks.sort_by(|a, b| a.path.cmp(&b.path));

    // mismo orden de suma siempre, para que los acumuladores por ciudad no
    // dependan de qué worker terminó antes
    completed.sort_by(|a, b| a.stat.year.cmp(&b.stat.year).then_with(|| a.path.cmp(&b.path)));

    let result = results::merge_stats(completed.iter().map(|o| (o.path.as_path(), &o.stat)))?;

    let mut areas = AreaPartials::default();
    for out in &completed {
        areas.merge(&out.areas);
    }

    let completeness = if tasks.iter().all(|t| t.state == TaskState::Completed) {
        Completeness::Complete
    } else {
        Completeness::Partial
    };

    info!(
        "agregación {} terminada: {} años, {:?}",
        run_id,
        result.len(),
        completeness
    );

    Ok(AnalyticsReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        input_dir: config.input_dir.clone(),
        keyword: config.keyword.clone(),
        match_mode: config.match_mode,
        workers: config.workers,
        policy: config.policy,
        completeness,
        tasks,
        result,
        areas: areas.finish(),
    })
}

/// Reparte los archivos en el pool acotado y espera a todas las tareas.
/// Devuelve un resultado por archivo, en orden de despacho.
async fn dispatch(paths: Vec<PathBuf>, config: &AnalyticsConfig) -> Vec<(PathBuf, Outcome)> {
    let sem = Arc::new(Semaphore::new(config.workers));
    let token = CancellationToken::new();
    let filter = Arc::new(config.filter());
    let fail_fast = config.policy == FailurePolicy::FailFast;

    let mut handles = Vec::with_capacity(paths.len());
    let mut never_started: Vec<PathBuf> = Vec::new();
    let mut pending = paths.into_iter();

    while let Some(path) = pending.next() {
        debug!("{} -> {:?}", path.display(), TaskState::Pending);

        // esperar un slot libre, salvo que ya se haya decidido abortar
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = sem.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            never_started.push(path);
            never_started.extend(pending.by_ref());
            break;
        };

        let task_path = path.clone();
        let task_filter = filter.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            debug!("{} -> {:?}", task_path.display(), TaskState::Running);

            let scan_token = task_token.clone();
            let scan_path = task_path.clone();
            let res = tokio::task::spawn_blocking(move || {
                engine::scan_partition(&scan_path, &task_filter, || scan_token.is_cancelled())
            })
            .await;

            let outcome = match res {
                Ok(Ok(out)) => Outcome::Completed(out),
                Ok(Err(AnalyticsError::Cancelled)) => Outcome::Cancelled,
                Ok(Err(e)) => Outcome::Failed(e),
                Err(e) => Outcome::Failed(AnalyticsError::TaskPanicked {
                    path: task_path.clone(),
                    message: e.to_string(),
                }),
            };

            if let Outcome::Failed(err) = &outcome {
                debug!("{} -> {:?}: {}", task_path.display(), TaskState::Failed, err);
                if fail_fast {
                    task_token.cancel();
                }
            }

            // el slot se libera después de cancelar: quien espera un permiso ve
            // el token cancelado antes que el permiso
            drop(permit);
            outcome
        });

        handles.push((path, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len() + never_started.len());
    for (path, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(AnalyticsError::TaskPanicked {
                path: path.clone(),
                message: e.to_string(),
            }),
        };
        outcomes.push((path, outcome));
    }

    if !never_started.is_empty() {
        info!("{} particiones canceladas antes de empezar", never_started.len());
    }
    outcomes.extend(never_started.into_iter().map(|p| (p, Outcome::Cancelled)));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{partition::write_partition, MatchMode, Record, Year};
    use std::{env, fs, path::Path};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("pool_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn rec(name: &str, from: f64, to: f64, area: &str, published_at: &str) -> Record {
        Record {
            name: name.to_string(),
            salary_from: Some(from),
            salary_to: Some(to),
            salary_currency: Some("RUR".to_string()),
            area_name: area.to_string(),
            published_at: published_at.to_string(),
        }
    }

    fn config(dir: &Path, keyword: &str, workers: usize, policy: FailurePolicy) -> AnalyticsConfig {
        AnalyticsConfig {
            input_dir: dir.to_path_buf(),
            keyword: keyword.to_string(),
            match_mode: MatchMode::CaseSensitive,
            workers,
            policy,
        }
    }

    fn write_corrupt(dir: &Path, year: u16) -> PathBuf {
        let path = dir.join(format!("vacancies_by_{year}.csv"));
        fs::write(
            &path,
            format!(
                "name,salary_from,salary_to,salary_currency,area_name,published_at\n\
                 ok,1,2,RUR,Москва,{year}-01-01\n\
                 fila rota sin columnas\n"
            ),
        )
        .unwrap();
        path
    }

    fn scenario_b(dir: &Path) {
        write_partition(
            dir,
            Year::new(2019),
            &[
                rec("Dev", 40.0, 60.0, "Москва", "2019-01-01"),
                rec("Dev", 50.0, 50.0, "Казань", "2019-02-01"),
            ],
        )
        .unwrap();
        write_partition(
            dir,
            Year::new(2021),
            &[rec("Dev", 100.0, 100.0, "Москва", "2021-01-01")],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn escenario_a_sin_coincidencias_da_sin_datos() {
        let tmp = temp_dir("scenario_a");
        write_partition(
            &tmp,
            Year::new(2020),
            &[
                rec("Аналитик", 10.0, 20.0, "Москва", "2020-01-01"),
                rec("Программист", 30.0, 30.0, "Москва", "2020-02-01"),
                rec("Тестировщик", 5.0, 15.0, "Казань", "2020-03-01"),
            ],
        )
        .unwrap();

        let report = run_aggregation(&config(&tmp, "Engineer", 2, FailurePolicy::SkipAndWarn))
            .await
            .unwrap();

        let y = Year::new(2020);
        assert!(report.is_complete());
        assert_eq!(report.result.count_all[&y], 3);
        assert_eq!(report.result.salary_all[&y], Some(55.0 / 3.0));
        assert_eq!(report.result.count_filtered[&y], 0);
        assert_eq!(report.result.salary_filtered[&y], None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn escenario_b_igual_con_uno_o_cuatro_workers() {
        let tmp = temp_dir("scenario_b");
        scenario_b(&tmp);

        let one = run_aggregation(&config(&tmp, "", 1, FailurePolicy::SkipAndWarn))
            .await
            .unwrap();
        let four = run_aggregation(&config(&tmp, "", 4, FailurePolicy::SkipAndWarn))
            .await
            .unwrap();

        assert_eq!(one.result, four.result);
        assert_eq!(one.areas, four.areas);
        let salaries: Vec<(Year, Option<f64>)> =
            one.result.salary_all.iter().map(|(y, v)| (*y, *v)).collect();
        assert_eq!(
            salaries,
            vec![(Year::new(2019), Some(50.0)), (Year::new(2021), Some(100.0))]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resultado_no_depende_del_tamano_del_pool() {
        let tmp = temp_dir("pool_sizes");
        let areas = ["Москва", "Казань", "Омск", "Тверь"];
        for (k, year) in (2003..2023).enumerate() {
            let recs: Vec<Record> = (0..(k % 5 + 1))
                .map(|i| {
                    let name = if i % 2 == 0 { "Аналитик данных" } else { "Программист" };
                    let base = (year as f64) * 0.37 + i as f64 * 13.1;
                    rec(name, base, base * 1.5, areas[(k + i) % areas.len()], &format!("{year}-05-01"))
                })
                .collect();
            write_partition(&tmp, Year::new(year), &recs).unwrap();
        }

        let baseline = run_aggregation(&config(&tmp, "Аналитик", 1, FailurePolicy::FailFast))
            .await
            .unwrap();
        assert_eq!(baseline.result.len(), 20);

        for workers in [2, 3, 4, 8, 64] {
            let other = run_aggregation(&config(&tmp, "Аналитик", workers, FailurePolicy::FailFast))
                .await
                .unwrap();
            assert_eq!(other.result, baseline.result, "workers = {workers}");
            assert_eq!(other.areas, baseline.areas, "workers = {workers}");
        }
    }

    #[tokio::test]
    async fn escenario_c_skip_and_warn_omite_la_particion_rota() {
        let tmp = temp_dir("scenario_c_skip");
        scenario_b(&tmp);
        let broken = write_corrupt(&tmp, 2020);

        let report = run_aggregation(&config(&tmp, "", 2, FailurePolicy::SkipAndWarn))
            .await
            .unwrap();

        assert_eq!(report.completeness, Completeness::Partial);
        assert_eq!(
            report.result.years().collect::<Vec<_>>(),
            vec![Year::new(2019), Year::new(2021)]
        );

        let failed: Vec<&TaskRecord> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].path, broken);
        assert_eq!(failed[0].year, Some(Year::new(2020)));
        assert!(failed[0].error.is_some());
        assert_eq!(report.succeeded().count(), 2);
    }

    #[tokio::test]
    async fn escenario_c_fail_fast_no_produce_resultado() {
        let tmp = temp_dir("scenario_c_fail_fast");
        scenario_b(&tmp);
        let broken = write_corrupt(&tmp, 2020);

        let err = run_aggregation(&config(&tmp, "", 1, FailurePolicy::FailFast))
            .await
            .unwrap_err();

        match err {
            AnalyticsError::PartitionRead { path, .. } => assert_eq!(path, broken),
            other => panic!("error inesperado: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fail_fast_con_un_worker_no_arranca_los_archivos_en_cola() {
        let tmp = temp_dir("fail_fast_queue");
        scenario_b(&tmp);
        let broken = write_corrupt(&tmp, 2020);
        // si llegara a abrirse fallaría; Cancelled prueba que nunca se leyó
        let missing = tmp.join("vacancies_by_2030.csv");
        let paths = vec![
            broken.clone(),
            tmp.join("vacancies_by_2019.csv"),
            tmp.join("vacancies_by_2021.csv"),
            missing.clone(),
        ];

        let outcomes = dispatch(paths.clone(), &config(&tmp, "", 1, FailurePolicy::FailFast)).await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].0, broken);
        assert!(matches!(outcomes[0].1, Outcome::Failed(AnalyticsError::PartitionRead { .. })));
        let queued: Vec<&PathBuf> = outcomes[1..].iter().map(|(p, _)| p).collect();
        assert_eq!(queued, paths[1..].iter().collect::<Vec<_>>());
        for (path, outcome) in &outcomes[1..] {
            assert!(
                matches!(outcome, Outcome::Cancelled),
                "{}: {outcome:?}",
                path.display()
            );
        }

        // con skip-and-warn los mismos archivos sí se procesan
        let outcomes = dispatch(paths, &config(&tmp, "", 1, FailurePolicy::SkipAndWarn)).await;
        assert!(matches!(outcomes[1].1, Outcome::Completed(_)));
        assert!(matches!(outcomes[2].1, Outcome::Completed(_)));
        assert!(matches!(outcomes[3].1, Outcome::Failed(_)));
        assert_eq!(outcomes[3].0, missing);
    }

    #[tokio::test]
    async fn run_aggregation_over_ignora_el_resto_del_directorio() {
        let tmp = temp_dir("explicit_paths");
        scenario_b(&tmp);

        let report = run_aggregation_over(
            vec![tmp.join("vacancies_by_2021.csv")],
            &config(&tmp, "", 2, FailurePolicy::SkipAndWarn),
        )
        .await
        .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.result.years().collect::<Vec<_>>(), vec![Year::new(2021)]);
        assert_eq!(report.tasks.len(), 1);
    }

    #[tokio::test]
    async fn dos_archivos_con_el_mismo_anio_es_violacion_de_invariante() {
        let tmp = temp_dir("collision");
        scenario_b(&tmp);
        let copy = tmp.join("vacancies_by_2019_copia.csv");
        fs::copy(tmp.join("vacancies_by_2019.csv"), &copy).unwrap();

        for policy in [FailurePolicy::SkipAndWarn, FailurePolicy::FailFast] {
            let err = run_aggregation(&config(&tmp, "", 4, policy)).await.unwrap_err();
            match err {
                AnalyticsError::InvariantViolation { year, first, second } => {
                    assert_eq!(year, Year::new(2019));
                    assert_eq!(first, tmp.join("vacancies_by_2019.csv"));
                    assert_eq!(second, copy);
                }
                other => panic!("error inesperado: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn directorio_vacio_da_resultado_completo_y_vacio() {
        let tmp = temp_dir("empty_dir");

        let report = run_aggregation(&config(&tmp, "", 2, FailurePolicy::SkipAndWarn))
            .await
            .unwrap();

        assert!(report.is_complete());
        assert!(report.result.is_empty());
        assert!(report.tasks.is_empty());
    }

    #[tokio::test]
    async fn directorio_inexistente_es_error() {
        let tmp = temp_dir("missing_dir");
        let err = run_aggregation(&config(&tmp.join("nada"), "", 2, FailurePolicy::SkipAndWarn))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Io { .. }));
    }

    #[tokio::test]
    async fn pool_de_cero_workers_se_rechaza() {
        let tmp = temp_dir("zero_workers");
        let err = run_aggregation(&config(&tmp, "", 0, FailurePolicy::SkipAndWarn))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Config(_)));
    }

    #[tokio::test]
    async fn informe_incluye_estadisticas_por_ciudad() {
        let tmp = temp_dir("areas");
        scenario_b(&tmp);

        let report = run_aggregation(&config(&tmp, "", 2, FailurePolicy::SkipAndWarn))
            .await
            .unwrap();

        // Москва: 50 y 100 -> 75; Казань: 50
        assert_eq!(
            report.areas.salary_by_area,
            vec![("Москва".to_string(), 75.0), ("Казань".to_string(), 50.0)]
        );
        assert_eq!(
            report.areas.share_by_area,
            vec![("Москва".to_string(), 0.6667), ("Казань".to_string(), 0.3333)]
        );
    }
}
