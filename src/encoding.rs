//! Module for encoding and decoding typed values.
//!
//! A value on the wire carries exactly the bytes a top-level protobuf field
//! of its type would carry, without the tag: varints for integers (zig-zag
//! for the signed variants and enums), fixed little-endian words for floats,
//! and a varint length prefix for strings, bytes, messages, and the
//! collection schemas. The codec is its own inverse for every supported
//! type.
use crate::error::Error;
use crate::objects::ObjectStore;
use crate::rpc;
use crate::types::{ObjectRef, TypeDescriptor, Value};
use bytes::{Buf, BufMut};
use prost::encoding::{decode_varint, encode_varint};
use prost::Message;

/// Encodes a value of the given declared type.
pub fn encode_value(value: &Value, ty: &TypeDescriptor) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    write_value(value, ty, &mut buf)?;
    Ok(buf)
}

/// Decodes a value of the given declared type, resolving object handles
/// through the store.
///
/// The input must contain exactly one value; trailing bytes are rejected.
pub fn decode_value(bytes: &[u8], ty: &TypeDescriptor, store: &ObjectStore) -> Result<Value, Error> {
    let mut buf = bytes;
    let value = read_value(&mut buf, ty, store)?;
    if !buf.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{} trailing byte(s) after {} value",
            buf.len(),
            ty
        )));
    }
    Ok(value)
}

fn mismatch(ty: &TypeDescriptor, value: &Value) -> Error {
    Error::InvalidArgument(format!("expected a {} value, got {}", ty, value.kind()))
}

fn write_value(value: &Value, ty: &TypeDescriptor, buf: &mut Vec<u8>) -> Result<(), Error> {
    match (ty, value) {
        (TypeDescriptor::Int32, Value::Int32(v)) => encode_varint(zigzag32(*v), buf),
        (TypeDescriptor::Int64, Value::Int64(v)) => encode_varint(zigzag64(*v), buf),
        (TypeDescriptor::UInt32, Value::UInt32(v)) => encode_varint(u64::from(*v), buf),
        (TypeDescriptor::UInt64, Value::UInt64(v)) => encode_varint(*v, buf),
        (TypeDescriptor::Float, Value::Float(v)) => buf.put_f32_le(*v),
        (TypeDescriptor::Double, Value::Double(v)) => buf.put_f64_le(*v),
        (TypeDescriptor::Bool, Value::Bool(v)) => encode_varint(u64::from(*v), buf),
        (TypeDescriptor::String, Value::String(s)) => write_length_delimited(s.as_bytes(), buf),
        (TypeDescriptor::Bytes, Value::Bytes(b)) => write_length_delimited(b, buf),
        (TypeDescriptor::Enum(desc), Value::Enum(v)) => {
            if !desc.values.contains(v) {
                return Err(Error::InvalidArgument(format!(
                    "{} is not a member of enum({})",
                    v, desc.name
                )));
            }
            encode_varint(zigzag32(*v), buf);
        }
        (TypeDescriptor::Message(_), Value::Message(b)) => write_length_delimited(b, buf),
        (TypeDescriptor::List(elem), Value::List(items)) => {
            let message = rpc::List {
                items: encode_elements(items, elem)?,
            };
            write_length_delimited(&message.encode_to_vec(), buf);
        }
        (TypeDescriptor::Set(elem), Value::Set(items)) => {
            // Defensive: never emit duplicate members.
            let mut unique: Vec<&Value> = Vec::with_capacity(items.len());
            for item in items {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            let mut encoded = Vec::with_capacity(unique.len());
            for item in unique {
                encoded.push(encode_value(item, elem)?);
            }
            let message = rpc::Set { items: encoded };
            write_length_delimited(&message.encode_to_vec(), buf);
        }
        (TypeDescriptor::Dictionary(key_ty, value_ty), Value::Dictionary(entries)) => {
            let mut message = rpc::Dictionary {
                entries: Vec::with_capacity(entries.len()),
            };
            for (i, (key, _)) in entries.iter().enumerate() {
                if entries[..i].iter().any(|(k, _)| k == key) {
                    return Err(Error::InvalidArgument(format!(
                        "duplicate {} key in dictionary",
                        key_ty
                    )));
                }
            }
            for (key, value) in entries {
                message.entries.push(rpc::DictionaryEntry {
                    key: encode_value(key, key_ty)?,
                    value: encode_value(value, value_ty)?,
                });
            }
            write_length_delimited(&message.encode_to_vec(), buf);
        }
        (TypeDescriptor::Tuple(elems), Value::Tuple(items)) => {
            if items.len() != elems.len() {
                return Err(Error::InvalidArgument(format!(
                    "tuple arity mismatch: expected {} element(s), got {}",
                    elems.len(),
                    items.len()
                )));
            }
            let mut encoded = Vec::with_capacity(items.len());
            for (item, elem) in items.iter().zip(elems) {
                encoded.push(encode_value(item, elem)?);
            }
            let message = rpc::Tuple { items: encoded };
            write_length_delimited(&message.encode_to_vec(), buf);
        }
        (TypeDescriptor::Object(_), Value::Object(None)) => encode_varint(0, buf),
        (TypeDescriptor::Object(class), Value::Object(Some(r))) => {
            if !class.matches(&r.object) {
                return Err(Error::InvalidArgument(format!(
                    "handle {} does not refer to a {}",
                    r.handle,
                    class.name()
                )));
            }
            encode_varint(r.handle, buf);
        }
        (TypeDescriptor::Void, _) => {
            return Err(Error::InvalidArgument("cannot encode a void value".to_string()));
        }
        (ty, value) => return Err(mismatch(ty, value)),
    }
    Ok(())
}

fn encode_elements(items: &[Value], elem: &TypeDescriptor) -> Result<Vec<Vec<u8>>, Error> {
    let mut encoded = Vec::with_capacity(items.len());
    for item in items {
        encoded.push(encode_value(item, elem)?);
    }
    Ok(encoded)
}

fn read_value(buf: &mut &[u8], ty: &TypeDescriptor, store: &ObjectStore) -> Result<Value, Error> {
    match ty {
        TypeDescriptor::Int32 => Ok(Value::Int32(unzigzag32(read_varint(buf, ty)?, ty)?)),
        TypeDescriptor::Int64 => Ok(Value::Int64(unzigzag64(read_varint(buf, ty)?))),
        TypeDescriptor::UInt32 => {
            let raw = read_varint(buf, ty)?;
            if raw > u64::from(u32::MAX) {
                return Err(Error::InvalidArgument(format!("{} overflows uint32", raw)));
            }
            Ok(Value::UInt32(raw as u32))
        }
        TypeDescriptor::UInt64 => Ok(Value::UInt64(read_varint(buf, ty)?)),
        TypeDescriptor::Float => {
            if buf.remaining() < 4 {
                return Err(truncated(ty));
            }
            Ok(Value::Float(buf.get_f32_le()))
        }
        TypeDescriptor::Double => {
            if buf.remaining() < 8 {
                return Err(truncated(ty));
            }
            Ok(Value::Double(buf.get_f64_le()))
        }
        TypeDescriptor::Bool => Ok(Value::Bool(read_varint(buf, ty)? != 0)),
        TypeDescriptor::String => {
            let bytes = read_length_delimited(buf, ty)?;
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| Error::InvalidArgument("string value is not valid UTF-8".to_string()))
        }
        TypeDescriptor::Bytes => Ok(Value::Bytes(read_length_delimited(buf, ty)?)),
        TypeDescriptor::Enum(desc) => {
            let value = unzigzag32(read_varint(buf, ty)?, ty)?;
            if !desc.values.contains(&value) {
                return Err(Error::InvalidArgument(format!(
                    "{} is not a member of enum({})",
                    value, desc.name
                )));
            }
            Ok(Value::Enum(value))
        }
        TypeDescriptor::Message(_) => Ok(Value::Message(read_length_delimited(buf, ty)?)),
        TypeDescriptor::List(elem) => {
            let payload = read_length_delimited(buf, ty)?;
            let message = decode_collection::<rpc::List>(&payload, ty)?;
            let mut items = Vec::with_capacity(message.items.len());
            for item in &message.items {
                items.push(decode_value(item, elem, store)?);
            }
            Ok(Value::List(items))
        }
        TypeDescriptor::Set(elem) => {
            let payload = read_length_delimited(buf, ty)?;
            let message = decode_collection::<rpc::Set>(&payload, ty)?;
            // Duplicates are accepted and collapsed.
            let mut items: Vec<Value> = Vec::with_capacity(message.items.len());
            for item in &message.items {
                let value = decode_value(item, elem, store)?;
                if !items.contains(&value) {
                    items.push(value);
                }
            }
            Ok(Value::Set(items))
        }
        TypeDescriptor::Dictionary(key_ty, value_ty) => {
            let payload = read_length_delimited(buf, ty)?;
            let message = decode_collection::<rpc::Dictionary>(&payload, ty)?;
            let mut entries: Vec<(Value, Value)> = Vec::with_capacity(message.entries.len());
            for entry in &message.entries {
                let key = decode_value(&entry.key, key_ty, store)?;
                if entries.iter().any(|(k, _)| *k == key) {
                    return Err(Error::InvalidArgument(format!(
                        "duplicate {} key in dictionary",
                        key_ty
                    )));
                }
                let value = decode_value(&entry.value, value_ty, store)?;
                entries.push((key, value));
            }
            Ok(Value::Dictionary(entries))
        }
        TypeDescriptor::Tuple(elems) => {
            let payload = read_length_delimited(buf, ty)?;
            let message = decode_collection::<rpc::Tuple>(&payload, ty)?;
            if message.items.len() != elems.len() {
                return Err(Error::InvalidArgument(format!(
                    "tuple arity mismatch: expected {} element(s), got {}",
                    elems.len(),
                    message.items.len()
                )));
            }
            let mut items = Vec::with_capacity(elems.len());
            for (item, elem) in message.items.iter().zip(elems) {
                items.push(decode_value(item, elem, store)?);
            }
            Ok(Value::Tuple(items))
        }
        TypeDescriptor::Object(class) => {
            let handle = read_varint(buf, ty)?;
            if handle == 0 {
                return Ok(Value::Object(None));
            }
            let object = store.get(handle)?;
            if !class.matches(&object) {
                return Err(Error::InvalidArgument(format!(
                    "handle {} does not refer to a {}",
                    handle,
                    class.name()
                )));
            }
            Ok(Value::Object(Some(ObjectRef::new(handle, object))))
        }
        TypeDescriptor::Void => {
            Err(Error::InvalidArgument("cannot decode a void value".to_string()))
        }
    }
}

fn truncated(ty: &TypeDescriptor) -> Error {
    Error::InvalidArgument(format!("truncated {} value", ty))
}

fn read_varint(buf: &mut &[u8], ty: &TypeDescriptor) -> Result<u64, Error> {
    decode_varint(buf).map_err(|_| truncated(ty))
}

fn read_length_delimited(buf: &mut &[u8], ty: &TypeDescriptor) -> Result<Vec<u8>, Error> {
    let len = read_varint(buf, ty)?;
    if len > buf.len() as u64 {
        return Err(truncated(ty));
    }
    let remaining = *buf;
    let (payload, rest) = remaining.split_at(len as usize);
    *buf = rest;
    Ok(payload.to_vec())
}

fn write_length_delimited(payload: &[u8], buf: &mut Vec<u8>) {
    encode_varint(payload.len() as u64, buf);
    buf.extend_from_slice(payload);
}

fn decode_collection<M: Message + Default>(payload: &[u8], ty: &TypeDescriptor) -> Result<M, Error> {
    M::decode(payload).map_err(|e| Error::InvalidArgument(format!("malformed {} value: {}", ty, e)))
}

fn zigzag32(value: i32) -> u64 {
    u64::from(((value << 1) ^ (value >> 31)) as u32)
}

fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag32(raw: u64, ty: &TypeDescriptor) -> Result<i32, Error> {
    if raw > u64::from(u32::MAX) {
        return Err(Error::InvalidArgument(format!("{} overflows {}", raw, ty)));
    }
    let raw = raw as u32;
    Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
}

fn unzigzag64(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}
