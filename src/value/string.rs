//! Text marshalling.
//!
//! Strings cross the boundary as pointers to encoded, terminated buffers.
//! UTF-8 is the default encoding; UTF-16 buffers are host-endian with a
//! two-byte terminator; Latin-1 rejects codepoints above U+00FF rather
//! than mangling them.

use crate::error::{FfiError, FfiResult};
use crate::types::{CLayout, CType, TextEncoding};

use super::{NativeValue, Ownership};

/// Encode `s` into a terminated native buffer.
pub fn encode_text(s: &str, encoding: TextEncoding) -> FfiResult<Vec<u8>> {
    match encoding {
        TextEncoding::Utf8 => {
            if s.bytes().any(|b| b == 0) {
                return Err(FfiError::marshal(
                    "utf8 string without interior NUL",
                    format!("{:?}", s),
                    None,
                ));
            }
            let mut buf = Vec::with_capacity(s.len() + 1);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
            Ok(buf)
        }
        TextEncoding::Utf16 => {
            let mut buf = Vec::with_capacity((s.len() + 1) * 2);
            for unit in s.encode_utf16() {
                if unit == 0 {
                    return Err(FfiError::marshal(
                        "utf16 string without interior NUL",
                        format!("{:?}", s),
                        None,
                    ));
                }
                buf.extend_from_slice(&unit.to_ne_bytes());
            }
            buf.extend_from_slice(&0u16.to_ne_bytes());
            Ok(buf)
        }
        TextEncoding::Latin1 => {
            let mut buf = Vec::with_capacity(s.len() + 1);
            for ch in s.chars() {
                let code = ch as u32;
                if code == 0 || code > 0xFF {
                    return Err(FfiError::marshal("latin1 codepoint", format!("{:?}", ch), None));
                }
                buf.push(code as u8);
            }
            buf.push(0);
            Ok(buf)
        }
    }
}

/// Decode a terminated native buffer at `addr` back into a managed
/// string. Callers handle the null-address case; this expects a live
/// buffer.
///
/// # Safety
/// `addr` must point at a readable, terminator-ended buffer in the given
/// encoding.
pub unsafe fn decode_text(addr: usize, encoding: TextEncoding) -> FfiResult<String> {
    match encoding {
        TextEncoding::Utf8 => {
            let mut len = 0usize;
            while *((addr + len) as *const u8) != 0 {
                len += 1;
            }
            let bytes = std::slice::from_raw_parts(addr as *const u8, len);
            String::from_utf8(bytes.to_vec())
                .map_err(|e| FfiError::marshal("utf8 text", e.to_string(), None))
        }
        TextEncoding::Utf16 => {
            let mut units = Vec::new();
            let mut cursor = addr as *const u16;
            while *cursor != 0 {
                units.push(*cursor);
                cursor = cursor.add(1);
            }
            String::from_utf16(&units)
                .map_err(|e| FfiError::marshal("utf16 text", e.to_string(), None))
        }
        TextEncoding::Latin1 => {
            let mut out = String::new();
            let mut cursor = addr as *const u8;
            while *cursor != 0 {
                out.push(*cursor as char);
                cursor = cursor.add(1);
            }
            Ok(out)
        }
    }
}

/// Retain an encoded string beyond the call that would otherwise scope
/// it.
///
/// The returned block is ExplicitlyManaged: excluded from automatic
/// reclamation, released exactly once via [`NativeValue::release`].
/// Passing a call-scoped string to a native function that stores the
/// pointer, then letting the managed side collect it, is the hazard this
/// exists to avoid.
pub fn retain_explicitly(s: &str, encoding: TextEncoding) -> FfiResult<NativeValue> {
    let bytes = encode_text(s, encoding)?;
    let value = NativeValue::alloc_raw(
        bytes.len(),
        1,
        1,
        CType::text_with(encoding),
        CLayout {
            size: bytes.len(),
            align: 1,
            offsets: Vec::new(),
        },
        Ownership::ExplicitlyManaged,
    )?;
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), value.addr() as *mut u8, bytes.len());
    }
    Ok(value)
}

/// Convenience: the default-encoding variant of [`retain_explicitly`].
pub fn retain_explicitly_utf8(s: &str) -> FfiResult<NativeValue> {
    retain_explicitly(s, TextEncoding::Utf8)
}
