use serde::{Deserialize, Serialize};
use std::{env, fmt, path::PathBuf, str::FromStr};

use crate::error::AnalyticsError;

pub const ENV_WORKERS: &str = "VACSTATS_WORKERS";
pub const ENV_FAILURE_POLICY: &str = "VACSTATS_FAILURE_POLICY";
pub const ENV_KEYWORD: &str = "VACSTATS_KEYWORD";

const FALLBACK_WORKERS: usize = 4;

/// Qué hacer cuando una partición no se puede procesar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Aborta la corrida entera y cancela las tareas pendientes.
    FailFast,
    /// Omite la partición, la reporta como fallida y sigue con el resto.
    #[default]
    SkipAndWarn,
}

impl FromStr for FailurePolicy {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "fail_fast" => Ok(FailurePolicy::FailFast),
            "skip-and-warn" | "skip_and_warn" | "skip" => Ok(FailurePolicy::SkipAndWarn),
            other => Err(AnalyticsError::Config(format!(
                "política de fallos desconocida: {other:?} (usa fail-fast o skip-and-warn)"
            ))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => f.write_str("fail-fast"),
            FailurePolicy::SkipAndWarn => f.write_str("skip-and-warn"),
        }
    }
}

/// Cómo se compara la palabra clave con el campo `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    #[default]
    CaseSensitive,
    CaseInsensitive,
}

/// Filtro del subconjunto "filtrado": `name` contiene la palabra clave.
/// Una palabra clave vacía selecciona todos los registros.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keyword: String,
    mode: MatchMode,
}

impl KeywordFilter {
    pub fn new(keyword: &str, mode: MatchMode) -> Self {
        let keyword = match mode {
            MatchMode::CaseSensitive => keyword.to_string(),
            MatchMode::CaseInsensitive => keyword.to_lowercase(),
        };
        Self { keyword, mode }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self.mode {
            MatchMode::CaseSensitive => name.contains(&self.keyword),
            MatchMode::CaseInsensitive => name.to_lowercase().contains(&self.keyword),
        }
    }
}

/// Configuración de una corrida del agregador.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Directorio con los archivos `vacancies_by_<año>.csv`.
    pub input_dir: PathBuf,
    pub keyword: String,
    pub match_mode: MatchMode,
    /// Tamaño del pool: máximo de particiones abiertas y procesándose a la vez.
    pub workers: usize,
    pub policy: FailurePolicy,
}

impl AnalyticsConfig {
    /// Valores por defecto, sobreescribibles con las env vars VACSTATS_*.
    pub fn from_env(input_dir: impl Into<PathBuf>) -> Result<Self, AnalyticsError> {
        let policy = match env::var(ENV_FAILURE_POLICY) {
            Ok(raw) => raw.parse()?,
            Err(_) => FailurePolicy::default(),
        };

        Ok(Self {
            input_dir: input_dir.into(),
            keyword: env::var(ENV_KEYWORD).unwrap_or_default(),
            match_mode: MatchMode::default(),
            workers: default_workers(),
            policy,
        })
    }

    pub fn filter(&self) -> KeywordFilter {
        KeywordFilter::new(&self.keyword, self.match_mode)
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        if self.workers == 0 {
            return Err(AnalyticsError::Config(
                "el pool necesita al menos 1 worker".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tamaño del pool por defecto: VACSTATS_WORKERS o el paralelismo del host.
pub fn default_workers() -> usize {
    env::var(ENV_WORKERS)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(host_parallelism)
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(FALLBACK_WORKERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_filter_por_defecto_distingue_mayusculas() {
        let f = KeywordFilter::new("Engineer", MatchMode::CaseSensitive);
        assert!(f.matches("Senior Engineer"));
        assert!(!f.matches("senior engineer"));
        assert!(!f.matches("Developer"));
    }

    #[test]
    fn keyword_filter_insensible_a_mayusculas() {
        let f = KeywordFilter::new("Аналитик", MatchMode::CaseInsensitive);
        assert!(f.matches("Бизнес-аналитик"));
        assert!(f.matches("АНАЛИТИК данных"));
        assert!(!f.matches("Программист"));
    }

    #[test]
    fn keyword_vacia_selecciona_todo() {
        let f = KeywordFilter::new("", MatchMode::CaseSensitive);
        assert!(f.matches("cualquier cosa"));
        assert!(f.matches(""));
    }

    #[test]
    fn failure_policy_se_parsea_desde_texto() {
        assert_eq!("fail-fast".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailFast);
        assert_eq!(
            "Skip-And-Warn".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::SkipAndWarn
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::default(), FailurePolicy::SkipAndWarn);
        assert_eq!(FailurePolicy::FailFast.to_string(), "fail-fast");
    }

    #[test]
    fn validate_rechaza_pool_vacio() {
        let cfg = AnalyticsConfig {
            input_dir: PathBuf::from("/tmp"),
            keyword: String::new(),
            match_mode: MatchMode::default(),
            workers: 0,
            policy: FailurePolicy::default(),
        };
        assert!(matches!(cfg.validate(), Err(AnalyticsError::Config(_))));
    }

    #[test]
    fn default_workers_respeta_env_var() {
        env::set_var(ENV_WORKERS, "3");
        assert_eq!(default_workers(), 3);
        env::set_var(ENV_WORKERS, "0");
        assert!(default_workers() >= 1);
        env::remove_var(ENV_WORKERS);
    }
}
