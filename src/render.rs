//! Tabular rendering of projected rows, and picking the format for a request.

use axum::{
    extract::Query,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use rust_xlsxwriter::{Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{entity::Entity, error::ApiError};

const XLSX_MEDIA_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer error: {0}")]
    Buffer(String),
    #[error("xlsx error: {0}")]
    Xlsx(#[from] XlsxError),
    #[error("{entity:?} row did not serialize to an object")]
    NotARow { entity: Entity },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
    Tsv,
    Xlsx,
}

impl Format {
    /// In order of preference when the client accepts anything.
    pub const ALL: [Format; 4] = [Format::Csv, Format::Json, Format::Tsv, Format::Xlsx];

    pub fn name(self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Json => "json",
            Format::Tsv => "tsv",
            Format::Xlsx => "xlsx",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Format::Csv => "text/csv",
            Format::Json => "application/json",
            Format::Tsv => "text/tab-separated-values",
            Format::Xlsx => XLSX_MEDIA_TYPE,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Format::Csv => "text/csv; charset=utf-8",
            Format::Json => "application/json",
            Format::Tsv => "text/tab-separated-values; charset=utf-8",
            Format::Xlsx => XLSX_MEDIA_TYPE,
        }
    }

    pub fn from_name(name: &str) -> Option<Format> {
        Format::ALL.into_iter().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Whether this format falls under one media range from an `Accept` header.
    fn matches_range(self, range: &str) -> bool {
        let media_type = self.media_type();
        match range.split_once('/') {
            Some(("*", "*")) => true,
            Some((kind, "*")) => media_type
                .split_once('/')
                .is_some_and(|(own, _)| own.eq_ignore_ascii_case(kind)),
            _ => media_type.eq_ignore_ascii_case(range),
        }
    }

    /// `?format=` wins over `Accept`; with neither, CSV.
    pub fn negotiate(uri: &Uri, headers: &HeaderMap) -> Result<Format, ApiError> {
        #[derive(Deserialize)]
        struct FormatQuery {
            format: Option<String>,
        }

        let Query(query) = Query::<FormatQuery>::try_from_uri(uri)
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        if let Some(requested) = query.format {
            if requested.trim().is_empty() {
                return Err(ApiError::BadRequest("format must not be empty".into()));
            }
            return Format::from_name(requested.trim())
                .ok_or(ApiError::NotAcceptable { requested });
        }

        let accept = match headers.get(header::ACCEPT) {
            None => return Ok(Format::Csv),
            Some(value) => value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Accept header is not valid text".into()))?,
        };
        negotiate_accept(accept)
    }
}

/// Picks the best supported entry of an `Accept` header by q-value.
///
/// An empty header accepts anything. Exact media types with `q=0` are
/// refused even when a wildcard would otherwise cover them.
fn negotiate_accept(accept: &str) -> Result<Format, ApiError> {
    let mut ranges: Vec<(f32, &str)> = Vec::new();
    let mut refused: Vec<Format> = Vec::new();
    let mut entries = 0;
    for entry in accept.split(',') {
        let mut params = entry.split(';');
        let range = params.next().unwrap_or("").trim();
        if range.is_empty() {
            continue;
        }
        entries += 1;

        let mut q = 1.0_f32;
        for param in params {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("q") {
                q = value
                    .trim()
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("bad q-value in Accept: {value}")))?;
            }
        }

        if q > 0.0 {
            ranges.push((q, range));
        } else if !range.contains('*') {
            refused.extend(Format::ALL.into_iter().filter(|f| f.matches_range(range)));
        }
    }
    if entries == 0 {
        return Ok(Format::Csv);
    }

    // stable sort keeps header order among equal weights
    ranges.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranges
        .iter()
        .find_map(|(_, range)| {
            Format::ALL
                .into_iter()
                .find(|f| f.matches_range(range) && !refused.contains(f))
        })
        .ok_or_else(|| ApiError::NotAcceptable { requested: accept.to_string() })
}

/// Renders `rows` as one table with `entity`'s columns.
pub fn render<R: Serialize>(entity: Entity, rows: &[R], format: Format) -> Result<Vec<u8>, RenderError> {
    match format {
        Format::Json => Ok(serde_json::to_vec(rows)?),
        Format::Csv => delimited(entity, rows, b','),
        Format::Tsv => delimited(entity, rows, b'\t'),
        Format::Xlsx => spreadsheet(entity, rows),
    }
}

fn delimited<R: Serialize>(entity: Entity, rows: &[R], delimiter: u8) -> Result<Vec<u8>, RenderError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(entity.columns())?;
    for row in rows {
        let Value::Object(fields) = serde_json::to_value(row)? else {
            return Err(RenderError::NotARow { entity });
        };
        let cells: Vec<String> = entity
            .columns()
            .iter()
            .map(|column| fields.get(*column).map(cell).unwrap_or_default())
            .collect();
        writer.write_record(&cells)?;
    }

    writer
        .into_inner()
        .map_err(|e| RenderError::Buffer(e.to_string()))
}

/// One worksheet named after the entity. Numbers and booleans keep their
/// type; every other cell is the text `delimited` would write.
fn spreadsheet<R: Serialize>(entity: Entity, rows: &[R]) -> Result<Vec<u8>, RenderError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(entity.path())?;

    for (col, column) in entity.columns().iter().enumerate() {
        sheet.write_string(0, col as u16, *column)?;
    }
    for (i, row) in rows.iter().enumerate() {
        let Value::Object(fields) = serde_json::to_value(row)? else {
            return Err(RenderError::NotARow { entity });
        };
        let r = i as u32 + 1;
        for (col, column) in entity.columns().iter().enumerate() {
            let c = col as u16;
            match fields.get(*column) {
                None | Some(Value::Null) => {}
                Some(Value::Bool(b)) => {
                    sheet.write_boolean(r, c, *b)?;
                }
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(v) => {
                        sheet.write_number(r, c, v)?;
                    }
                    None => {
                        sheet.write_string(r, c, n.to_string())?;
                    }
                },
                Some(other) => {
                    sheet.write_string(r, c, cell(other))?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// One table cell. Nulls are empty; sequences stay JSON arrays.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// A rendered table ready to send.
#[derive(Debug)]
pub struct Table {
    pub entity: Entity,
    pub format: Format,
    pub rows: usize,
    pub body: Vec<u8>,
}

impl IntoResponse for Table {
    fn into_response(self) -> Response {
        let mut resp = (StatusCode::OK, self.body).into_response();
        let headers = resp.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(self.format.content_type()));
        headers.insert(header::VARY, HeaderValue::from_static("Accept"));
        if self.format != Format::Json {
            let disposition = format!(
                "attachment; filename=\"{}.{}\"",
                self.entity.path(),
                self.format.name()
            );
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
        }
        resp
    }
}
