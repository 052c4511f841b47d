use bytes::{BufMut, BytesMut};

use super::value::Value;

/// Encodes a value in canonical form, dictionary keys in sorted order.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.to_vec()
}

fn encode_into(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Integer(n) => {
            buf.put_u8(b'i');
            buf.put_slice(n.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::Bytes(bytes) => encode_string(bytes, buf),
        Value::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(entries) => {
            buf.put_u8(b'd');
            for (key, value) in entries {
                encode_string(key, buf);
                encode_into(value, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn encode_string(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}
