use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap};

use crate::{engine::SalaryAcc, record::Record};

/// Las ciudades con menos de este porcentaje de vacantes no entran en el informe.
pub const MIN_AREA_SHARE: f64 = 0.01;
pub const TOP_AREAS: usize = 10;

/// Acumuladores por ciudad de una o varias particiones.
/// A diferencia de las estadísticas por año, aquí sí hay claves repetidas entre
/// particiones: se combinan sumando.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaPartials {
    areas: BTreeMap<String, SalaryAcc>,
}

impl AreaPartials {
    pub fn add(&mut self, rec: &Record) {
        self.areas
            .entry(rec.area_name.clone())
            .or_default()
            .add(rec);
    }

    pub fn merge(&mut self, other: &AreaPartials) {
        for (area, acc) in &other.areas {
            self.areas.entry(area.clone()).or_default().merge(acc);
        }
    }

    pub fn total(&self) -> u64 {
        self.areas.values().map(|a| a.count).sum()
    }

    pub fn finish(&self) -> AreaStats {
        let total = self.total();
        if total == 0 {
            return AreaStats::default();
        }

        let kept: Vec<(&String, &SalaryAcc, f64)> = self
            .areas
            .iter()
            .map(|(area, acc)| (area, acc, round4(acc.count as f64 / total as f64)))
            .filter(|(_, _, share)| *share >= MIN_AREA_SHARE)
            .collect();

        let mut salary_by_area: Vec<(String, f64)> = kept
            .iter()
            .filter_map(|(area, acc, _)| acc.mean().map(|m| ((*area).clone(), m.floor())))
            .collect();
        sort_desc(&mut salary_by_area);
        salary_by_area.truncate(TOP_AREAS);

        let mut share_by_area: Vec<(String, f64)> = kept
            .iter()
            .map(|(area, _, share)| ((*area).clone(), *share))
            .collect();
        sort_desc(&mut share_by_area);
        share_by_area.truncate(TOP_AREAS);

        AreaStats {
            salary_by_area,
            share_by_area,
        }
    }
}

/// Informe por ciudad: top de salario medio y top de cuota de vacantes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaStats {
    pub salary_by_area: Vec<(String, f64)>,
    pub share_by_area: Vec<(String, f64)>,
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

// mayor valor primero; empates por nombre para que el orden sea estable
fn sort_desc(entries: &mut [(String, f64)]) {
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}
