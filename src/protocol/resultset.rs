//! Text-protocol result sets
//!
//! A `COM_QUERY` result set is: column count, one definition per column,
//! EOF, zero or more rows, EOF. Rows are sequences of length-encoded
//! strings, with 0xFB standing for NULL.

use super::packet::{read_lenenc_int, read_lenenc_value};

/// One row of a text result set
pub type TextRow = Vec<Option<String>>;

/// Parse the column-count packet that opens a result set
pub fn parse_column_count(payload: &[u8]) -> Option<u64> {
    read_lenenc_int(payload).map(|(count, _)| count)
}

/// Parse a text row with the expected number of columns
pub fn parse_text_row(payload: &[u8], columns: usize) -> Option<TextRow> {
    let mut row = Vec::with_capacity(columns);
    let mut offset = 0;
    for _ in 0..columns {
        let (value, consumed) = read_lenenc_value(&payload[offset..])?;
        row.push(value.map(|v| String::from_utf8_lossy(v).to_string()));
        offset += consumed;
    }
    Some(row)
}
