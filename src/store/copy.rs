//! Encoder for PostgreSQL `COPY ... FROM STDIN (FORMAT binary)` payloads.
//!
//! Layout: 11-byte signature, flags and header-extension words, then one
//! tuple per row (`i16` field count, each field as `i32` length + bytes,
//! length `-1` for NULL), then an `i16` trailer of `-1`.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;

use crate::error::StoreResult;

const SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

/// Microseconds between the Unix epoch and the PostgreSQL epoch (2000-01-01).
const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// JSONB binary format version.
const JSONB_VERSION: u8 = 1;

/// Chunk size for `CopyData` messages.
const CHUNK_BYTES: usize = 64 * 1024;

/// Builds a binary COPY payload row by row.
#[derive(Debug)]
pub(crate) struct BinaryCopyWriter {
    buf: Vec<u8>,
    rows: usize,
}

impl BinaryCopyWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(SIGNATURE);
        buf.extend_from_slice(&0i32.to_be_bytes()); // flags
        buf.extend_from_slice(&0i32.to_be_bytes()); // header extension length
        Self { buf, rows: 0 }
    }

    pub fn begin_row(&mut self, fields: i16) {
        self.buf.extend_from_slice(&fields.to_be_bytes());
        self.rows += 1;
    }

    fn null(&mut self) {
        self.buf.extend_from_slice(&(-1i32).to_be_bytes());
    }

    fn field(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
        self.buf.extend_from_slice(bytes);
    }

    pub fn text(&mut self, value: Option<&str>) {
        match value {
            Some(s) => self.field(s.as_bytes()),
            None => self.null(),
        }
    }

    pub fn jsonb(&mut self, value: Option<&serde_json::Value>) {
        match value {
            Some(v) => {
                let text = v.to_string();
                self.buf
                    .extend_from_slice(&((text.len() + 1) as i32).to_be_bytes());
                self.buf.push(JSONB_VERSION);
                self.buf.extend_from_slice(text.as_bytes());
            }
            None => self.null(),
        }
    }

    pub fn float8(&mut self, value: Option<f64>) {
        match value {
            Some(f) => self.field(&f.to_be_bytes()),
            None => self.null(),
        }
    }

    pub fn timestamptz(&mut self, at: DateTime<Utc>) {
        let micros = at.timestamp_micros() - PG_EPOCH_OFFSET_MICROS;
        self.field(&micros.to_be_bytes());
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&(-1i16).to_be_bytes());
        self.buf
    }
}

/// Stream `payload` through `statement` (a `COPY ... FROM STDIN` command).
pub(crate) async fn copy_in(conn: &mut PgConnection, statement: &str, payload: &[u8]) -> StoreResult<u64> {
    let mut copy = conn.copy_in_raw(statement).await?;
    for chunk in payload.chunks(CHUNK_BYTES) {
        copy.send(chunk).await?;
    }
    Ok(copy.finish().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_is_header_plus_trailer() {
        let payload = BinaryCopyWriter::new().finish();
        assert_eq!(&payload[..11], SIGNATURE);
        assert_eq!(payload.len(), 11 + 4 + 4 + 2);
        assert_eq!(&payload[19..], &[0xff, 0xff]);
    }

    #[test]
    fn test_row_encoding() {
        let mut writer = BinaryCopyWriter::new();
        writer.begin_row(3);
        writer.text(Some("ab"));
        writer.text(None);
        writer.jsonb(Some(&serde_json::json!(1)));
        assert_eq!(writer.rows(), 1);

        let payload = writer.finish();
        let row = &payload[19..payload.len() - 2];
        assert_eq!(
            row,
            &[
                0, 3, // field count
                0, 0, 0, 2, b'a', b'b', // text
                0xff, 0xff, 0xff, 0xff, // NULL
                0, 0, 0, 2, 1, b'1', // jsonb version + "1"
            ]
        );
    }

    #[test]
    fn test_timestamp_is_relative_to_2000() {
        let mut writer = BinaryCopyWriter::new();
        writer.begin_row(1);
        writer.timestamptz(DateTime::from_timestamp(946_684_800, 0).unwrap());
        let payload = writer.finish();
        assert_eq!(&payload[21..25], &[0, 0, 0, 8]);
        assert_eq!(&payload[25..33], &0i64.to_be_bytes());
    }
}
