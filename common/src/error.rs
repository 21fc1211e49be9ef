use std::{io, path::PathBuf};

use thiserror::Error;

use crate::record::Year;

/// Problemas de forma en un archivo CSV de vacantes (cabecera, campos, tipos).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("falta la columna {column:?} en la cabecera {found:?}")]
    MissingColumn { column: &'static str, found: Vec<String> },

    #[error("fila {row}: se esperaban {expected} campos, hay {found}")]
    FieldCount {
        row: u64,
        expected: usize,
        found: usize,
    },

    #[error("fila {row}: el campo {field} no es numérico: {value:?}")]
    Number {
        row: u64,
        field: &'static str,
        value: String,
    },

    #[error("fila {row}: published_at sin año válido: {value:?}")]
    Year { row: u64, value: String },

    #[error("fila {row}: año {found} dentro de una partición del año {expected}")]
    MixedYears { row: u64, expected: Year, found: Year },

    #[error("no se puede deducir el año de la partición vacía {0}")]
    UnknownYear(PathBuf),
}

/// Fallo al leer un archivo de registros.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("no se pudo escribir la partición {year} en {path}: {source}")]
    PartitionWrite {
        year: Year,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no se pudo leer la partición {path}: {source}")]
    PartitionRead {
        path: PathBuf,
        #[source]
        source: ReadError,
    },

    #[error("no se pudo leer el dataset {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: ReadError,
    },

    #[error("{count} particiones no se pudieron escribir (la primera, {first})")]
    PartitionWritesFailed { count: usize, first: Year },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Dos archivos dicen contener el mismo año: el merge no puede elegir uno.
    #[error("el año {year} aparece en dos particiones: {first} y {second}")]
    InvariantViolation {
        year: Year,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("configuración inválida: {0}")]
    Config(String),

    #[error("tarea cancelada")]
    Cancelled,

    #[error("la tarea de {path} terminó con pánico: {message}")]
    TaskPanicked { path: PathBuf, message: String },

    #[error("error de E/S en {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("patrón de búsqueda inválido: {0}")]
    Pattern(#[from] glob::PatternError),
}
