/*!
Binary codec for a single [`Record`].

Field order and widths are part of the on-disk format and are pinned by the
container's magic token; changing either requires a new format version.

```text
name_len   u16 BE | name bytes (UTF-8)
value_len  u16 BE | value bytes
domain_len u16 BE | domain bytes
path_len   u16 BE | path bytes
creation        i64 BE
expiration      i64 BE
last_access     i64 BE
flags           u8   bit0 secure, bit1 http_only, bit2 cross_site_restricted
priority        u8
```
*/

use bytes::{Buf, BufMut};

use crate::record::{Priority, Record, RecordFlags};
use crate::{PersistError, Result};

/// Encode one record into `sink`.
///
/// The record is validated and every string length checked before the first
/// byte is written, so a rejected record never leaves a partial entry behind.
pub fn encode<B: BufMut>(record: &Record, sink: &mut B) -> Result<()> {
    record.validate()?;
    let strings = [
        ("name", &record.name),
        ("value", &record.value),
        ("domain", &record.domain),
        ("path", &record.path),
    ];
    for (field, value) in strings {
        if value.len() > u16::MAX as usize {
            return Err(PersistError::validation(format!(
                "record {field} is {} bytes, limit is {}",
                value.len(),
                u16::MAX
            )));
        }
    }

    for (_, value) in strings {
        put_string(sink, value);
    }
    sink.put_i64(record.creation);
    sink.put_i64(record.expiration);
    sink.put_i64(record.last_access);
    sink.put_u8(record.flags.to_byte());
    sink.put_u8(record.priority.as_byte());
    Ok(())
}

/// Encoded size of a record in bytes
pub fn encoded_len(record: &Record) -> usize {
    4 * 2
        + record.name.len()
        + record.value.len()
        + record.domain.len()
        + record.path.len()
        + 3 * 8
        + 2
}

/// Decode one record from `source`.
///
/// Returns [`PersistError::EndOfStream`] when `source` is already exhausted,
/// which is how a container signals that no records remain. Running out of
/// bytes anywhere after the first byte yields [`PersistError::TruncatedRecord`].
pub fn decode<B: Buf>(source: &mut B) -> Result<Record> {
    if !source.has_remaining() {
        return Err(PersistError::EndOfStream);
    }

    let name = get_string(source, "name")?;
    let value = get_string(source, "value")?;
    let domain = get_string(source, "domain")?;
    let path = get_string(source, "path")?;
    let creation = get_i64(source, "creation")?;
    let expiration = get_i64(source, "expiration")?;
    let last_access = get_i64(source, "last_access")?;
    let flags = RecordFlags::from_byte(get_u8(source, "flags")?)?;
    let priority = Priority::from_byte(get_u8(source, "priority")?)?;

    let record = Record {
        name,
        value,
        domain,
        path,
        creation,
        expiration,
        last_access,
        flags,
        priority,
    };
    record
        .validate()
        .map_err(|e| PersistError::invalid_record(e.to_string()))?;
    Ok(record)
}

fn put_string<B: BufMut>(sink: &mut B, value: &str) {
    sink.put_u16(value.len() as u16);
    sink.put_slice(value.as_bytes());
}

fn ensure<B: Buf>(source: &B, needed: usize, field: &'static str) -> Result<()> {
    if source.remaining() < needed {
        return Err(PersistError::TruncatedRecord { field });
    }
    Ok(())
}

fn get_string<B: Buf>(source: &mut B, field: &'static str) -> Result<String> {
    ensure(source, 2, field)?;
    let len = source.get_u16() as usize;
    ensure(source, len, field)?;
    let mut raw = vec![0u8; len];
    source.copy_to_slice(&mut raw);
    String::from_utf8(raw)
        .map_err(|e| PersistError::invalid_record(format!("{field} is not valid UTF-8: {e}")))
}

fn get_i64<B: Buf>(source: &mut B, field: &'static str) -> Result<i64> {
    ensure(source, 8, field)?;
    Ok(source.get_i64())
}

fn get_u8<B: Buf>(source: &mut B, field: &'static str) -> Result<u8> {
    ensure(source, 1, field)?;
    Ok(source.get_u8())
}
