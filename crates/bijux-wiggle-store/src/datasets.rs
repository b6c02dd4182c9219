// SPDX-License-Identifier: Apache-2.0

use crate::{StoreError, StoreErrorCode, WiggleStore};
use bijux_wiggle_model::{AttributeName, DatasetSelector, CORE_DATASET_COLUMNS};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Header plus rows, rendered as text the way the TSV was loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn validation(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Validation, message)
}

fn quote_ident(name: &AttributeName) -> String {
    format!("\"{}\"", name.as_str())
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Text(v) => v,
        Value::Blob(v) => String::from_utf8_lossy(&v).into_owned(),
    }
}

fn annotation_flag(raw: &str) -> Result<i64, StoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(1),
        "0" | "false" | "no" | "" => Ok(0),
        other => Err(validation(format!("annotation must be 0 or 1, got `{other}`"))),
    }
}

fn table_columns(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("PRAGMA table_info(datasets)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn dump(conn: &Connection, sql: &str, args: &[&str]) -> Result<DatasetTable, StoreError> {
    let columns = table_columns(conn)?;
    if columns.is_empty() {
        return Ok(DatasetTable::default());
    }
    let mut stmt = conn.prepare(sql)?;
    let width = columns.len();
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            (0..width)
                .map(|idx| row.get::<_, Value>(idx).map(value_text))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DatasetTable { columns, rows })
}

impl WiggleStore {
    /// Loads a tab-separated dataset description. The first five header
    /// columns are fixed; any further column becomes a searchable attribute.
    pub fn load_datasets(&mut self, tsv: &Path) -> Result<usize, StoreError> {
        let text = std::fs::read_to_string(tsv).map_err(|e| {
            StoreError::new(StoreErrorCode::Io, format!("read {}: {e}", tsv.display()))
        })?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header_line = lines
            .next()
            .ok_or_else(|| validation(format!("{} is empty", tsv.display())))?;
        let header: Vec<&str> = header_line.split('\t').map(str::trim).collect();
        if header.len() < CORE_DATASET_COLUMNS.len()
            || header[..CORE_DATASET_COLUMNS.len()] != CORE_DATASET_COLUMNS
        {
            return Err(validation(format!(
                "dataset table header must start with {}",
                CORE_DATASET_COLUMNS.join(", ")
            )));
        }
        let names = header
            .iter()
            .map(|h| AttributeName::parse(h).map_err(|e| validation(e.0)))
            .collect::<Result<Vec<_>, _>>()?;

        let extra = names[CORE_DATASET_COLUMNS.len()..]
            .iter()
            .map(|n| format!(",\n  {} TEXT", quote_ident(n)))
            .collect::<String>();
        let create = format!(
            "CREATE TABLE IF NOT EXISTS datasets (
  location TEXT NOT NULL,
  name TEXT,
  type TEXT,
  annotation INTEGER NOT NULL DEFAULT 0,
  assembly TEXT NOT NULL{extra}
)"
        );
        let insert = format!(
            "INSERT INTO datasets ({}) VALUES ({})",
            names.iter().map(quote_ident).collect::<Vec<_>>().join(", "),
            (1..=names.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
        );

        let tx = self.conn.transaction()?;
        tx.execute_batch(&create)?;
        let existing = table_columns(&tx)?;
        if existing.iter().map(String::as_str).ne(header.iter().copied()) {
            return Err(validation(format!(
                "dataset columns [{}] do not match the loaded table [{}]",
                header.join(", "),
                existing.join(", ")
            )));
        }
        let mut loaded = 0_usize;
        {
            let mut stmt = tx.prepare(&insert)?;
            for (lineno, line) in lines.enumerate() {
                let cells: Vec<&str> = line.split('\t').collect();
                if cells.len() != names.len() {
                    return Err(validation(format!(
                        "line {} has {} fields, expected {}",
                        lineno + 2,
                        cells.len(),
                        names.len()
                    )));
                }
                let mut values: Vec<Value> = cells
                    .iter()
                    .map(|c| Value::Text(c.trim().to_string()))
                    .collect();
                values[3] = Value::Integer(annotation_flag(cells[3])?);
                stmt.execute(params_from_iter(values.iter()))?;
                loaded += 1;
            }
        }
        tx.commit()?;
        tracing::info!(path = %tsv.display(), rows = loaded, "datasets loaded");
        Ok(loaded)
    }

    pub fn load_assembly(&self, name: &str, chrom_sizes: &Path) -> Result<(), StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(validation("assembly name must not be empty"));
        }
        self.conn.execute(
            "INSERT INTO assemblies (name, location) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET location = excluded.location",
            params![name, chrom_sizes.to_string_lossy().into_owned()],
        )?;
        Ok(())
    }

    pub fn chrom_sizes(&self, assembly: &str) -> Result<String, StoreError> {
        self.conn
            .query_row(
                "SELECT location FROM assemblies WHERE name = ?1",
                params![assembly],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                StoreError::new(
                    StoreErrorCode::NotFound,
                    format!("no chromosome sizes loaded for assembly `{assembly}`"),
                )
            })
    }

    /// Sorted locations of datasets of `assembly` matching the selector.
    /// Attributes must be columns of the loaded table.
    pub fn resolve(
        &self,
        selector: &DatasetSelector,
        assembly: &str,
    ) -> Result<Vec<String>, StoreError> {
        let columns = table_columns(&self.conn)?;
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let mut clauses = vec!["assembly = ?1".to_string()];
        let mut args = vec![assembly.to_string()];
        for (attribute, values) in selector.iter() {
            if !columns.iter().any(|c| c == attribute.as_str()) {
                return Err(validation(format!("unknown dataset attribute `{attribute}`")));
            }
            let alternatives = values
                .iter()
                .map(|value| {
                    args.push(value.clone());
                    format!("{} = ?{}", quote_ident(attribute), args.len())
                })
                .collect::<Vec<_>>();
            clauses.push(format!("({})", alternatives.join(" OR ")));
        }
        let sql = format!(
            "SELECT location FROM datasets WHERE {} ORDER BY location ASC",
            clauses.join(" AND ")
        );
        tracing::debug!(sql = %sql, selector = %selector.describe(), "resolving datasets");
        let mut stmt = self.conn.prepare(&sql)?;
        let locations = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locations)
    }

    /// Distinct values of every attribute column beyond the fixed five.
    pub fn attributes(&self) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let mut out = BTreeMap::new();
        for column in table_columns(&self.conn)? {
            if CORE_DATASET_COLUMNS.contains(&column.as_str()) {
                continue;
            }
            let ident = AttributeName::parse(&column).map_err(|e| validation(e.0))?;
            let ident = quote_ident(&ident);
            let mut stmt = self.conn.prepare(&format!(
                "SELECT DISTINCT {ident} FROM datasets WHERE {ident} IS NOT NULL ORDER BY 1"
            ))?;
            let values = stmt
                .query_map([], |row| row.get::<_, Value>(0).map(value_text))?
                .collect::<Result<Vec<_>, _>>()?;
            out.insert(column, values);
        }
        Ok(out)
    }

    pub fn annotations(&self, assembly: &str) -> Result<DatasetTable, StoreError> {
        dump(
            &self.conn,
            "SELECT * FROM datasets WHERE assembly = ?1 AND annotation ORDER BY location",
            &[assembly],
        )
    }

    pub fn datasets(&self) -> Result<DatasetTable, StoreError> {
        dump(&self.conn, "SELECT * FROM datasets ORDER BY location", &[])
    }
}
