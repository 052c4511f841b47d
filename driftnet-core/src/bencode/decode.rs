use std::collections::BTreeMap;

use bytes::{Buf, Bytes, BytesMut};

use super::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Decodes one value from the front of `buf` and advances past it.
///
/// Returns `Ok(None)` without touching the buffer when it is empty or starts
/// with a byte that cannot begin a value. On error the buffer is also left
/// untouched so the caller decides whether to drop the connection or wait.
///
/// # Errors
///
/// - `BencodeError::UnexpectedEof` - Value is truncated
/// - `BencodeError::NonStringKey` - Dictionary key is not a string
/// - `BencodeError::InvalidInteger` - Integer body is not decimal or overflows i64
pub fn decode(buf: &mut BytesMut) -> Result<Option<Value>, BencodeError> {
    match decode_prefix(buf)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Decodes one value from the front of `data`, returning it with the number
/// of bytes it occupied.
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_prefix(data: &[u8]) -> Result<Option<(Value, usize)>, BencodeError> {
    match data.first() {
        Some(b'0'..=b'9' | b'i' | b'l' | b'd') => {
            let mut pos = 0;
            let value = decode_value(data, &mut pos, 0)?;
            Ok(Some((value, pos)))
        }
        _ => Ok(None),
    }
}

/// Decodes `data` as exactly one value.
///
/// # Errors
///
/// - `BencodeError::TrailingData` - Bytes remain after the value
/// - `BencodeError::UnexpectedEof` - Input is empty or truncated
/// - `BencodeError::UnexpectedByte` - Input does not start with a value
pub fn decode_exact(data: &[u8]) -> Result<Value, BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;
    if pos != data.len() {
        return Err(BencodeError::TrailingData {
            remaining: data.len() - pos,
        });
    }
    Ok(value)
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep { max: MAX_DEPTH });
    }

    let Some(&byte) = data.get(*pos) else {
        return Err(BencodeError::UnexpectedEof { position: *pos });
    };

    match byte {
        b'0'..=b'9' => decode_string(data, pos).map(Value::Bytes),
        b'i' => decode_integer(data, pos),
        b'l' => decode_list(data, pos, depth),
        b'd' => decode_dict(data, pos, depth),
        byte => Err(BencodeError::UnexpectedByte {
            byte,
            position: *pos,
        }),
    }
}

/// Scans forward from `start` to `terminator`, returning its index.
fn find_terminator(data: &[u8], start: usize, terminator: u8) -> Result<usize, BencodeError> {
    data[start..]
        .iter()
        .position(|&b| b == terminator)
        .map(|offset| start + offset)
        .ok_or(BencodeError::UnexpectedEof {
            position: data.len(),
        })
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let start = *pos + 1;
    let end = find_terminator(data, start, b'e')?;
    let digits = &data[start..end];

    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::InvalidInteger {
            reason: format!("'{}' is not a decimal number", String::from_utf8_lossy(digits)),
        });
    }

    // Leading zeros and "-0" are tolerated for compatibility with lax encoders.
    let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidInteger {
        reason: "not ASCII".to_string(),
    })?;
    let value = text
        .parse::<i64>()
        .map_err(|e| BencodeError::InvalidInteger {
            reason: format!("'{text}': {e}"),
        })?;

    *pos = end + 1;
    Ok(Value::Integer(value))
}

fn decode_string(data: &[u8], pos: &mut usize) -> Result<Bytes, BencodeError> {
    let start = *pos;
    let colon = find_terminator(data, start, b':')?;
    let digits = &data[start..colon];

    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(BencodeError::InvalidStringLength { position: start });
    }
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or(BencodeError::InvalidStringLength { position: start })?;

    let body_start = colon + 1;
    let body_end = body_start
        .checked_add(len)
        .ok_or(BencodeError::InvalidStringLength { position: start })?;
    if body_end > data.len() {
        return Err(BencodeError::UnexpectedEof {
            position: data.len(),
        });
    }

    *pos = body_end;
    Ok(Bytes::copy_from_slice(&data[body_start..body_end]))
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut items = Vec::new();

    loop {
        match data.get(*pos) {
            None => return Err(BencodeError::UnexpectedEof { position: *pos }),
            Some(b'e') => break,
            Some(_) => items.push(decode_value(data, pos, depth + 1)?),
        }
    }

    *pos += 1;
    Ok(Value::List(items))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut entries = BTreeMap::new();

    loop {
        match data.get(*pos) {
            None => return Err(BencodeError::UnexpectedEof { position: *pos }),
            Some(b'e') => break,
            Some(b'0'..=b'9') => {
                let key = decode_string(data, pos)?;
                let value = decode_value(data, pos, depth + 1)?;
                entries.insert(key, value);
            }
            Some(_) => return Err(BencodeError::NonStringKey { position: *pos }),
        }
    }

    *pos += 1;
    Ok(Value::Dict(entries))
}
