use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
};

use crate::error::{ReadError, SchemaError};

/// Marca de orden de bytes UTF-8. Los lectores heredados (Excel) la esperan.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Columnas de un archivo de vacantes, en el orden en que se escriben.
pub const HEADER: [&str; 6] = [
    "name",
    "salary_from",
    "salary_to",
    "salary_currency",
    "area_name",
    "published_at",
];

/// Año de publicación: la clave de partición.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Year(u16);

impl Year {
    pub fn new(year: u16) -> Self {
        Year(year)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Exactamente 4 dígitos ASCII. `u16::from_str` aceptaría "+202", así que no basta.
    pub fn parse(s: &str) -> Option<Year> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok().map(Year)
    }

    /// Toma los 4 primeros caracteres de un timestamp tipo "2020-05-01T10:00:00+0300".
    pub fn from_published_at(published_at: &str) -> Option<Year> {
        Year::parse(published_at.get(..4)?)
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Una vacante. Los salarios son opcionales: "sin salario" no es lo mismo que salario 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub salary_from: Option<f64>,
    pub salary_to: Option<f64>,
    pub salary_currency: Option<String>,
    pub area_name: String,
    pub published_at: String,
}

impl Record {
    pub fn year(&self) -> Option<Year> {
        Year::from_published_at(&self.published_at)
    }

    /// Punto medio de la horquilla salarial, sólo si ambos extremos existen.
    pub fn salary_midpoint(&self) -> Option<f64> {
        match (self.salary_from, self.salary_to) {
            (Some(from), Some(to)) => Some((from + to) / 2.0),
            _ => None,
        }
    }

    fn to_row(&self) -> [String; 6] {
        [
            self.name.clone(),
            fmt_opt_number(self.salary_from),
            fmt_opt_number(self.salary_to),
            self.salary_currency.clone().unwrap_or_default(),
            self.area_name.clone(),
            self.published_at.clone(),
        ]
    }
}

fn fmt_opt_number(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

/// Celdas que cuentan como salario ausente, igual que una celda vacía.
const MISSING_TOKENS: &[&str] = &[
    "NaN", "nan", "-NaN", "-nan", "NA", "N/A", "n/a", "<NA>", "#N/A", "NULL", "null", "None",
];

fn parse_opt_number(raw: &str, field: &'static str, row: u64) -> Result<Option<f64>, SchemaError> {
    let raw = raw.trim();
    if raw.is_empty() || MISSING_TOKENS.contains(&raw) {
        return Ok(None);
    }
    // `inf` y compañía parsean como f64, pero no son un salario
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(SchemaError::Number {
            row,
            field,
            value: raw.to_string(),
        }),
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

/// Posición de cada columna conocida dentro de la cabecera real del archivo.
#[derive(Debug, Clone, Copy)]
struct Columns([usize; 6]);

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, SchemaError> {
        let found: Vec<String> = headers
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut idx = [0usize; 6];
        for (slot, column) in idx.iter_mut().zip(HEADER) {
            *slot = found
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| SchemaError::MissingColumn {
                    column,
                    found: found.clone(),
                })?;
        }
        Ok(Columns(idx))
    }
}

/// Iterador sobre los registros de un CSV de vacantes.
/// Cada fila se valida por separado; el primer error corta la lectura de quien lo consuma.
pub struct RecordReader<R: Read> {
    inner: csv::StringRecordsIntoIter<R>,
    columns: Columns,
    width: usize,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Result<Self, ReadError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            // el ancho lo validamos nosotros para devolver un SchemaError con la fila
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let columns = Columns::resolve(&headers)?;

        Ok(Self {
            inner: csv_reader.into_records(),
            columns,
            width: headers.len(),
        })
    }

    fn decode(&self, row: &csv::StringRecord) -> Result<Record, SchemaError> {
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        if row.len() != self.width {
            return Err(SchemaError::FieldCount {
                row: line,
                expected: self.width,
                found: row.len(),
            });
        }

        let [name, from, to, currency, area, published] = self.columns.0;
        let field = |i: usize| row.get(i).unwrap_or("");

        let published_at = field(published).trim().to_string();
        if Year::from_published_at(&published_at).is_none() {
            return Err(SchemaError::Year {
                row: line,
                value: published_at,
            });
        }

        Ok(Record {
            name: field(name).to_string(),
            salary_from: parse_opt_number(field(from), "salary_from", line)?,
            salary_to: parse_opt_number(field(to), "salary_to", line)?,
            salary_currency: non_empty(field(currency)),
            area_name: field(area).trim().to_string(),
            published_at,
        })
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.inner.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };
        Some(self.decode(&row).map_err(ReadError::from))
    }
}

/// Abre un CSV de vacantes para leerlo en streaming.
pub fn open_records(path: &Path) -> Result<RecordReader<BufReader<File>>, ReadError> {
    let file = File::open(path)?;
    RecordReader::new(BufReader::new(file))
}

/// Lee un CSV de vacantes completo a memoria (p. ej. el dataset unificado).
pub fn read_records(path: &Path) -> Result<Vec<Record>, ReadError> {
    open_records(path)?.collect()
}

/// Escribe BOM + cabecera + una fila por registro.
pub fn write_records<W: Write>(mut writer: W, records: &[Record]) -> io::Result<W> {
    writer.write_all(UTF8_BOM)?;

    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(HEADER)?;
    for rec in records {
        csv_writer.write_record(rec.to_row())?;
    }
    csv_writer.flush()?;

    csv_writer
        .into_inner()
        .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))
}
