use std::io::Read;

use csv::{ErrorKind, ReaderBuilder, StringRecord, StringRecordsIntoIter};

use crate::domain::Fragment;
use crate::error::AnnotateError;

pub const FIELDS_PER_FRAGMENT: usize = 3;
pub const FIELDS_PER_LINE: usize = 2 * FIELDS_PER_FRAGMENT;

/// The two reads of one input line, each validated on its own.
pub type FragmentPair = [Result<Fragment, AnnotateError>; 2];

/// Reads `;`-delimited lines, each holding two `(header, sequence, quality)` reads.
///
/// Quoting is disabled: `"` is a valid quality character. A line with the
/// wrong field count or bytes that are not UTF-8 is an `InvalidRecord`; only
/// I/O failures end the stream.
pub struct FragmentReader<R: Read> {
    records: StringRecordsIntoIter<R>,
}

impl<R: Read> FragmentReader<R> {
    pub fn new(input: R) -> Self {
        let reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(input);
        Self {
            records: reader.into_records(),
        }
    }
}

impl<R: Read> Iterator for FragmentReader<R> {
    type Item = Result<FragmentPair, AnnotateError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(err) => return Some(Err(map_csv_error(err))),
        };
        Some(parse_line(&record))
    }
}

fn map_csv_error(err: csv::Error) -> AnnotateError {
    let line = err.position().map(|pos| pos.line()).unwrap_or(0);
    match err.kind() {
        ErrorKind::Utf8 { .. } => AnnotateError::InvalidRecord {
            line,
            message: err.to_string(),
        },
        _ => AnnotateError::Filesystem(err.to_string()),
    }
}

fn parse_line(record: &StringRecord) -> Result<FragmentPair, AnnotateError> {
    let line = record.position().map(|pos| pos.line()).unwrap_or(0);
    if record.len() != FIELDS_PER_LINE {
        return Err(AnnotateError::InvalidRecord {
            line,
            message: format!("expected {FIELDS_PER_LINE} fields, found {}", record.len()),
        });
    }
    let fragment = |offset: usize| {
        Fragment::new(&record[offset], &record[offset + 1], &record[offset + 2]).map_err(
            |err| match err {
                AnnotateError::InvalidRecord { message, .. } => {
                    AnnotateError::InvalidRecord { line, message }
                }
                other => other,
            },
        )
    };
    Ok([fragment(0), fragment(FIELDS_PER_FRAGMENT)])
}
