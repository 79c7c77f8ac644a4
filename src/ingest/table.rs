use crate::ingest::error::ImportError;
use crate::ingest::schema::DATE_FORMAT;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Delimited,
    Workbook,
}

impl TableFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" | "delimited" | "text" => Some(Self::Delimited),
            "excel" | "xlsx" | "workbook" | "spreadsheet" => Some(Self::Workbook),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ImportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(Self::Delimited),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(Self::Workbook),
            "" => Err(ImportError::format(format!(
                "cannot determine file type of {}: no extension",
                path.to_string_lossy()
            ))),
            other => Err(ImportError::format(format!(
                "unsupported file extension: .{}",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delimited => "csv",
            Self::Workbook => "excel",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendering used for text-typed fields and in messages.
    pub fn display(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.trim().to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) if v.fract() == 0.0 && v.is_finite() => format!("{:.0}", v),
            Self::Float(v) => v.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }
}

/// One data row. `line` is the 1-based position in the source file, header included.
#[derive(Debug, Clone)]
pub struct Row {
    pub line: usize,
    cells: HashMap<String, CellValue>,
}

impl Row {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            cells: HashMap::new(),
        }
    }

    pub fn insert(&mut self, column: &str, value: CellValue) {
        self.cells.insert(normalize_column(column), value);
    }

    #[cfg(test)]
    pub fn with(mut self, column: &str, value: CellValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.cells.get(key)
    }

    pub fn has_column(&self, key: &str) -> bool {
        self.cells.contains_key(key)
    }

    fn is_blank(&self) -> bool {
        self.cells.values().all(CellValue::is_empty)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Normalized header names, in file order.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn has_column(&self, key: &str) -> bool {
        self.columns.iter().any(|c| c == key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub delimiter: u8,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

pub fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn read_table(
    bytes: &[u8],
    format: TableFormat,
    opts: &ReadOptions,
) -> Result<Table, ImportError> {
    let table = match format {
        TableFormat::Delimited => read_delimited(bytes, opts)?,
        TableFormat::Workbook => read_workbook(bytes)?,
    };
    tracing::debug!(
        format = format.as_str(),
        columns = table.columns.len(),
        rows = table.rows.len(),
        "table read"
    );
    Ok(table)
}

/// Maps header position to normalized name; blank headers drop their column.
fn build_header(raw: Vec<String>) -> Result<Vec<Option<String>>, ImportError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for name in raw {
        let key = normalize_column(&name);
        if key.is_empty() {
            out.push(None);
            continue;
        }
        if !seen.insert(key.clone()) {
            return Err(ImportError::format(format!(
                "duplicate column in header: {}",
                name.trim()
            )));
        }
        out.push(Some(key));
    }
    if out.iter().all(Option::is_none) {
        return Err(ImportError::format("file has no header row"));
    }
    Ok(out)
}

fn header_names(header: &[Option<String>]) -> Vec<String> {
    header.iter().flatten().cloned().collect()
}

fn read_delimited(bytes: &[u8], opts: &ReadOptions) -> Result<Table, ImportError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(opts.delimiter)
        .from_reader(bytes);

    let raw_header = rdr
        .headers()
        .map_err(|e| ImportError::format(format!("could not read header row: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let header = build_header(raw_header)?;

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| {
            ImportError::format(format!("could not parse delimited text: {}", e))
        })?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(i + 2);
        let mut row = Row::new(line);
        for (idx, key) in header.iter().enumerate() {
            let Some(key) = key else {
                continue;
            };
            let value = match record.get(idx) {
                Some(s) if !s.trim().is_empty() => CellValue::Text(s.to_string()),
                _ => CellValue::Empty,
            };
            row.cells.insert(key.clone(), value);
        }
        if !row.is_blank() {
            rows.push(row);
        }
    }

    Ok(Table {
        columns: header_names(&header),
        rows,
    })
}

fn read_workbook(bytes: &[u8]) -> Result<Table, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::format(format!("could not open workbook: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::format("workbook has no sheets"))?
        .map_err(|e| ImportError::format(format!("could not read first sheet: {}", e)))?;

    // Ranges skip leading empty rows; keep reported line numbers sheet-absolute.
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
    let mut sheet_rows = range.rows();
    let Some(header_cells) = sheet_rows.next() else {
        return Err(ImportError::format("file has no header row"));
    };
    let header = build_header(header_cells.iter().map(header_text).collect())?;

    let mut rows = Vec::new();
    for (offset, cells) in sheet_rows.enumerate() {
        let mut row = Row::new(first_row + offset + 2);
        for (idx, key) in header.iter().enumerate() {
            let Some(key) = key else {
                continue;
            };
            let value = cells.get(idx).map(cell_value).unwrap_or(CellValue::Empty);
            row.cells.insert(key.clone(), value);
        }
        if !row.is_blank() {
            rows.push(row);
        }
    }

    Ok(Table {
        columns: header_names(&header),
        rows,
    })
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => cell_value(other).display(),
    }
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.trim().is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(v) => CellValue::Int(*v),
        Data::Float(v) => CellValue::Float(*v),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| CellValue::Date(d.date()))
            .unwrap_or(CellValue::Float(dt.as_f64())),
        Data::DateTimeIso(s) => s
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}
