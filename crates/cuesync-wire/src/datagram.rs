//! Complete datagram = header + payload

use cuesync_core::{CueSyncError, CueSyncResult};

use crate::{Header, WirePayload, HEADER_SIZE};

/// Receive buffer size; no CueSync datagram comes close
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Decode and validate a received datagram.
///
/// Returns the header and the payload slice bounded by the declared payload
/// length. Rejects short buffers, foreign headers, and payload lengths that
/// overrun the datagram.
pub fn split_datagram(buf: &[u8]) -> CueSyncResult<(Header, &[u8])> {
    let header = Header::decode(buf)?;
    if !header.validate() {
        return Err(CueSyncError::InvalidHeader("magic, version or length mismatch"));
    }

    let declared = header.payload_len as usize;
    let available = buf.len() - HEADER_SIZE;
    if declared > available {
        return Err(CueSyncError::PayloadOverrun {
            declared,
            available,
        });
    }

    Ok((header, &buf[HEADER_SIZE..HEADER_SIZE + declared]))
}

/// Serialize a header followed by a raw payload, fixing up the payload length
pub fn build_datagram(mut header: Header, payload: &[u8]) -> Vec<u8> {
    header.payload_len = payload.len() as u16;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Serialize a header followed by a typed payload
pub fn build_message<P: WirePayload>(header: Header, payload: &P) -> Vec<u8> {
    build_datagram(header, &payload.to_vec())
}
