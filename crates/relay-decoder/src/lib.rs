//! relay-decoder
//!
//! Pure functions that turn a gzip-compressed XML row-set into a sequence of
//! `Record`s. No I/O: the blob is already in memory by the time it reaches
//! this crate (the Repository fetched it as an OUT parameter).

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use relay_model::{Action, Meta, Pk, Record, RelayError};

const ROW: &[u8] = b"ROW";

/// Decode a row-set blob. `None` (the stored procedure returned `NULL`) and
/// `Some(&[])` both decode to an empty sequence, with no error.
pub fn decode(input: Option<&[u8]>) -> Result<Vec<Record>, RelayError> {
    let Some(bytes) = input else {
        return Ok(Vec::new());
    };
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let xml = gunzip(bytes)?;
    decode_rows(&xml)
}

fn gunzip(input: &[u8]) -> Result<Vec<u8>, RelayError> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RelayError::Decompress(e.to_string()))?;
    Ok(out)
}

fn decode_rows(xml: &[u8]) -> Result<Vec<Record>, RelayError> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut rows = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == ROW => {
                rows.push(decode_row(&mut reader)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}

/// Decode one `ROW` element. The caller has already consumed the `ROW`
/// `Start` event; this reads children until the matching `ROW` `End`.
fn decode_row(reader: &mut Reader<&[u8]>) -> Result<Record, RelayError> {
    let mut meta = Meta::default();
    let mut fields = BTreeMap::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let name = element_name(&e);
                let value = read_first_text(reader, e.name().as_ref())?;
                if let Some(v) = value {
                    apply_child(&mut meta, &mut fields, &name, v);
                }
            }
            Event::Empty(_) => {
                // Self-closing element: no character-data child, so it
                // contributes nothing (absent != empty string at this layer).
            }
            Event::End(e) if e.name().as_ref() == ROW => break,
            Event::Eof => {
                return Err(RelayError::Decode("unexpected eof inside ROW".into()))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(Record { meta, fields })
}

/// Read everything up to the matching end tag of the element just opened,
/// returning the first character-data token encountered (if any). Nested
/// elements are walked over but not recursed into for values, matching the
/// "only the first character-data token is taken" rule.
fn read_first_text(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<Option<String>, RelayError> {
    let mut buf = Vec::new();
    let mut depth: i32 = 0;
    let mut first_text: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                if depth == 0 && e.name().as_ref() == name {
                    break;
                }
                depth -= 1;
            }
            Event::Text(t) => {
                if first_text.is_none() {
                    let text = t.unescape().map_err(xml_err)?.into_owned();
                    first_text = Some(text);
                }
            }
            Event::Eof => {
                return Err(RelayError::Decode("unexpected eof reading element text".into()))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(first_text)
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn xml_err(e: quick_xml::Error) -> RelayError {
    RelayError::Decode(e.to_string())
}

/// Route a decoded child element into either the reserved meta fields or the
/// lower-cased fields mapping. Duplicate column names: last-write-wins (a
/// plain map insert already has that behaviour).
fn apply_child(meta: &mut Meta, fields: &mut BTreeMap<String, String>, name: &str, value: String) {
    match name {
        "__op" => meta.op = Action::parse(&value),
        "__pk_name" => meta.pk.name = value,
        "__pk_val" => meta.pk.value = value,
        "__ts" => meta.ts = value,
        "__ux_ts" => meta.ux_ts = value,
        _ => {
            fields.insert(name.to_ascii_lowercase(), value);
        }
    }
}
