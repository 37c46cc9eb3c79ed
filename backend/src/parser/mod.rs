//! Resource parsers: delimited text (here), GeoJSON ([`geojson`]) and zipped
//! shapefiles ([`shp`]).
//!
//! Delimited text gets encoding and separator auto-detection. Rows become flat
//! records of string values keyed by header.

pub mod geojson;
pub mod shp;

use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{DatasetResult, FormatError, FormatResult};
use crate::models::{DatasetRows, Record, ResourceFormat};
use crate::projection::Crs;

/// Separators tried in order when no fixed headers are given.
pub const CANDIDATE_DELIMITERS: [char; 4] = [',', ';', '\t', '|'];

/// Separator used by header-less files with fixed headers.
pub const FIXED_HEADER_DELIMITER: char = '|';

pub const UTF8: &str = "utf-8";
pub const LATIN1: &str = "iso-8859-1";

// =============================================================================
// Parse Result
// =============================================================================

/// Something the parser tolerated but wants reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// A data row had a different number of fields than the header.
    WidthMismatch {
        line: u64,
        expected: usize,
        found: usize,
    },
    /// No candidate separator split the header into two or more columns.
    NoDelimiter,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseWarning::WidthMismatch {
                line,
                expected,
                found,
            } => write!(f, "Line {}: expected {} fields, found {}", line, expected, found),
            ParseWarning::NoDelimiter => write!(f, "No usable delimiter found"),
        }
    }
}

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Parsed rows keyed by header
    pub records: Vec<Record>,
    /// Encoding the text was decoded with
    pub encoding: &'static str,
    /// Detected or fixed delimiter; `None` when nothing matched
    pub delimiter: Option<char>,
    pub headers: Vec<String>,
    pub warnings: Vec<ParseWarning>,
}

impl ParseResult {
    fn empty(encoding: &'static str) -> Self {
        Self {
            records: Vec::new(),
            encoding,
            delimiter: None,
            headers: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Number of rows admitted despite a width mismatch.
    pub fn width_mismatches(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, ParseWarning::WidthMismatch { .. }))
            .count()
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode bytes as UTF-8, falling back to ISO-8859-1 when the UTF-8 reading shows
/// replacement characters or double-encoding artifacts. A leading BOM is dropped.
pub fn decode_content(bytes: &[u8]) -> (String, &'static str) {
    let utf8 = String::from_utf8_lossy(bytes);
    let (text, encoding) = if looks_misdecoded(&utf8) {
        // WHATWG maps the iso-8859-1 label to windows-1252
        (encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(), LATIN1)
    } else {
        (utf8.into_owned(), UTF8)
    };
    let text = match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    };
    (text, encoding)
}

/// U+FFFD, or `Ã`/`Â` followed by a character in U+0080..=U+00BF.
fn looks_misdecoded(text: &str) -> bool {
    if text.contains('\u{fffd}') {
        return true;
    }
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if matches!(c, 'Ã' | 'Â') {
            if let Some(next) = chars.peek() {
                if ('\u{80}'..='\u{bf}').contains(next) {
                    return true;
                }
            }
        }
    }
    false
}

// =============================================================================
// Delimiter Detection
// =============================================================================

/// First candidate separator that splits the header line into at least two columns.
pub fn detect_delimiter(content: &str) -> Option<char> {
    let header_line = content.lines().find(|line| !line.trim().is_empty())?;
    CANDIDATE_DELIMITERS
        .into_iter()
        .find(|&sep| header_line.split(sep).count() >= 2)
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse delimited bytes. With `fixed_headers` the file is pipe-delimited and has
/// no header row; otherwise the separator is auto-detected.
pub fn parse_delimited(
    bytes: &[u8],
    fixed_headers: Option<&[String]>,
) -> FormatResult<ParseResult> {
    let (content, encoding) = decode_content(bytes);

    if let Some(headers) = fixed_headers {
        return parse_rows(&content, FIXED_HEADER_DELIMITER, Some(headers.to_vec()), encoding);
    }

    match detect_delimiter(&content) {
        Some(delimiter) => parse_rows(&content, delimiter, None, encoding),
        None => {
            warn!(encoding, "No usable delimiter in delimited text");
            let mut result = ParseResult::empty(encoding);
            result.warnings.push(ParseWarning::NoDelimiter);
            Ok(result)
        }
    }
}

/// Parse with an explicit delimiter. `headers: None` takes them from the first row.
pub fn parse_rows(
    content: &str,
    delimiter: char,
    headers: Option<Vec<String>>,
    encoding: &'static str,
) -> FormatResult<ParseResult> {
    let delimiter_byte = u8::try_from(delimiter)
        .map_err(|_| FormatError::Delimited(format!("delimiter {:?} is not ASCII", delimiter)))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = reader.records();
    let headers = match headers {
        Some(headers) => headers,
        None => loop {
            match rows.next() {
                Some(record) => {
                    let record = record?;
                    let fields = clean_fields(&record);
                    if !is_blank(&fields) {
                        break fields;
                    }
                }
                None => break Vec::new(),
            }
        },
    };

    let mut result = ParseResult {
        records: Vec::new(),
        encoding,
        delimiter: Some(delimiter),
        headers,
        warnings: Vec::new(),
    };
    if result.headers.is_empty() {
        return Ok(result);
    }

    for record in rows {
        let record = record?;
        let values = clean_fields(&record);
        if is_blank(&values) {
            continue;
        }

        if values.len() != result.headers.len() {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            warn!(
                line,
                expected = result.headers.len(),
                found = values.len(),
                "Row width does not match header"
            );
            result.warnings.push(ParseWarning::WidthMismatch {
                line,
                expected: result.headers.len(),
                found: values.len(),
            });
        }

        let mut row = Record::new();
        for (i, header) in result.headers.iter().enumerate() {
            let value = values.get(i).cloned().unwrap_or_default();
            row.insert(header.clone(), Value::String(value));
        }
        result.records.push(row);
    }

    debug!(
        rows = result.records.len(),
        delimiter = ?delimiter,
        encoding,
        "Parsed delimited text"
    );
    Ok(result)
}

fn clean_fields(record: &csv::StringRecord) -> Vec<String> {
    record
        .iter()
        .map(|s| s.trim().trim_matches('"').to_string())
        .collect()
}

fn is_blank(fields: &[String]) -> bool {
    fields.iter().all(|f| f.is_empty())
}

/// Parse a delimited file from disk.
pub fn parse_file<P: AsRef<Path>>(
    path: P,
    fixed_headers: Option<&[String]>,
) -> FormatResult<ParseResult> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| {
        FormatError::Delimited(format!("Cannot read '{}': {}", path.as_ref().display(), e))
    })?;
    parse_delimited(&bytes, fixed_headers)
}

// =============================================================================
// Dispatch
// =============================================================================

/// Rows of one downloaded resource plus the number of tolerated width mismatches.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResource {
    pub rows: DatasetRows,
    pub width_mismatches: usize,
}

impl From<DatasetRows> for ParsedResource {
    fn from(rows: DatasetRows) -> Self {
        Self {
            rows,
            width_mismatches: 0,
        }
    }
}

/// Turn downloaded bytes into rows according to the declared format.
///
/// Shapefiles are projected to WGS84 here, from `source_crs` when given and the
/// archive's `.prj` otherwise.
pub fn parse_resource(
    format: ResourceFormat,
    bytes: &[u8],
    fixed_headers: Option<&[String]>,
    source_crs: Option<Crs>,
) -> DatasetResult<ParsedResource> {
    match format {
        ResourceFormat::Csv => {
            let result = parse_delimited(bytes, fixed_headers)?;
            Ok(ParsedResource {
                width_mismatches: result.width_mismatches(),
                rows: DatasetRows::Records(result.records),
            })
        }
        ResourceFormat::Json | ResourceFormat::GeoJson => Ok(geojson::parse_json(bytes)?.into()),
        ResourceFormat::Shp => {
            let collection = shp::shapefile_to_geojson(bytes, source_crs)?;
            Ok(DatasetRows::Features(collection).into())
        }
    }
}
