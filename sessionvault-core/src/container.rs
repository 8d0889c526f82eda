/*!
Container framing: a magic token followed by zero or more encoded records.

The token doubles as the format version marker and as a cheap check that the
payload was decrypted with the key that wrote it. Decoding is all-or-nothing:
either every record up to a clean end of stream comes back, or an error does.
*/

use bytes::BufMut;
use tracing::debug;

use crate::codec;
use crate::record::Record;
use crate::{PersistError, Result};

/// Version byte carried at the end of the default magic token
pub const FORMAT_VERSION: u8 = 1;

/// Default magic token for the record container
pub const DEFAULT_MAGIC_TOKEN: [u8; 8] = [b'c', b'0', b'O', b'k', b'1', b'3', b'5', FORMAT_VERSION];

/// Encode `records` behind `magic`, preserving their order.
///
/// No identity-key deduplication happens here; callers get back exactly what
/// they put in.
pub fn encode(magic: &[u8], records: &[Record]) -> Result<Vec<u8>> {
    let capacity = magic.len() + records.iter().map(codec::encoded_len).sum::<usize>();
    let mut out = Vec::with_capacity(capacity);
    out.put_slice(magic);
    for record in records {
        codec::encode(record, &mut out)?;
    }
    debug!(records = records.len(), bytes = out.len(), "Encoded record container");
    Ok(out)
}

/// Decode a container produced by [`encode`].
///
/// Fails with [`PersistError::FormatMismatch`] when the leading bytes differ
/// from `magic` (including a buffer shorter than the token). Any codec error
/// other than the end-of-stream terminator discards everything decoded so far.
pub fn decode(magic: &[u8], payload: &[u8]) -> Result<Vec<Record>> {
    let Some(mut body) = payload.strip_prefix(magic) else {
        return Err(PersistError::FormatMismatch);
    };

    let mut records = Vec::new();
    loop {
        match codec::decode(&mut body) {
            Ok(record) => records.push(record),
            Err(PersistError::EndOfStream) => break,
            Err(e) => return Err(e),
        }
    }
    debug!(records = records.len(), "Decoded record container");
    Ok(records)
}
