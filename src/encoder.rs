//! Serde encoder for the MaxMind DB data section format.
//!
//! Values are encoded with the smallest control-byte form the format
//! allows. [`DataSection`] stores every distinct map key once and refers to
//! it with pointers, and hands out the same offset for records that encode
//! to identical bytes.

use std::collections::HashMap;

use log::debug;
use serde::ser::{self, Impossible, Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::MmdbError;

pub type EncodeResult<T> = Result<T, MmdbError>;

const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

const MAX_SIZE: usize = 65_821 + (1 << 24);

fn push_be(out: &mut Vec<u8>, value: u128, len: usize) {
    for i in (0..len).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

fn write_control(out: &mut Vec<u8>, type_num: u8, size: usize) -> EncodeResult<()> {
    let (marker, extra, extra_len) = match size {
        s if s < 29 => (s as u8, 0, 0),
        s if s < 285 => (29, s - 29, 1),
        s if s < 65_821 => (30, s - 285, 2),
        s if s < MAX_SIZE => (31, s - 65_821, 3),
        s => {
            return Err(MmdbError::encoding(format!(
                "value of size {s} exceeds the format limit"
            )))
        }
    };

    if type_num < 8 {
        out.push((type_num << 5) | marker);
    } else {
        // Extended type
        out.push(marker);
        out.push(type_num - 7);
    }
    push_be(out, extra as u128, extra_len);
    Ok(())
}

fn write_pointer(out: &mut Vec<u8>, offset: usize) -> EncodeResult<()> {
    let ctrl = TYPE_POINTER << 5;
    match offset {
        o if o < 2048 => {
            out.push(ctrl | ((o >> 8) & 0x7) as u8);
            push_be(out, o as u128, 1);
        }
        o if o < 526_336 => {
            let o = o - 2048;
            out.push(ctrl | 0x08 | ((o >> 16) & 0x7) as u8);
            push_be(out, o as u128, 2);
        }
        o if o < 134_744_064 => {
            let o = o - 526_336;
            out.push(ctrl | 0x10 | ((o >> 24) & 0x7) as u8);
            push_be(out, o as u128, 3);
        }
        o if o <= u32::MAX as usize => {
            out.push(ctrl | 0x18);
            push_be(out, o as u128, 4);
        }
        o => {
            return Err(MmdbError::encoding_at(
                "pointer target is beyond the 32-bit range",
                o,
            ))
        }
    }
    Ok(())
}

fn write_uint(out: &mut Vec<u8>, type_num: u8, value: u128) -> EncodeResult<()> {
    let len = (128 - value.leading_zeros() as usize).div_ceil(8);
    write_control(out, type_num, len)?;
    push_be(out, value, len);
    Ok(())
}

fn is_string(encoded: &[u8]) -> bool {
    encoded.first().map(|ctrl| ctrl >> 5) == Some(TYPE_STRING)
}

/// Encodes a single value without key interning.
///
/// Used for sections that are decoded on their own, such as the metadata.
pub fn encode<T>(value: &T) -> EncodeResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    DataSection::standalone().encode(value)
}

/// The data section of a database being written.
#[derive(Debug)]
pub struct DataSection {
    buf: Vec<u8>,
    keys: HashMap<Vec<u8>, usize>,
    records: HashMap<Vec<u8>, usize>,
    intern_keys: bool,
}

impl Default for DataSection {
    fn default() -> Self {
        DataSection::new()
    }
}

impl DataSection {
    pub fn new() -> DataSection {
        DataSection {
            buf: Vec::new(),
            keys: HashMap::new(),
            records: HashMap::new(),
            intern_keys: true,
        }
    }

    fn standalone() -> DataSection {
        DataSection {
            intern_keys: false,
            ..DataSection::new()
        }
    }

    /// Stores a record and returns its offset in the data section.
    ///
    /// Records whose encoding matches an earlier record share its offset.
    pub fn insert<T>(&mut self, value: &T) -> EncodeResult<usize>
    where
        T: Serialize + ?Sized,
    {
        let mark = self.buf.len();
        let encoded = match self.encode(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.rollback(mark);
                return Err(e);
            }
        };
        if let Some(&offset) = self.records.get(&encoded) {
            debug!("reusing record at offset {offset}");
            return Ok(offset);
        }

        let offset = self.buf.len();
        self.buf.extend_from_slice(&encoded);
        self.records.insert(encoded, offset);
        Ok(offset)
    }

    fn encode<T>(&mut self, value: &T) -> EncodeResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        value
            .serialize(&mut Encoder { section: self })?
            .ok_or_else(|| MmdbError::encoding("cannot store an absent value"))
    }

    // Drops keys interned by a record that failed to encode.
    fn rollback(&mut self, mark: usize) {
        self.buf.truncate(mark);
        self.keys.retain(|_, offset| *offset < mark);
    }

    // Turns an encoded key into the bytes written in front of its value.
    fn key_bytes(&mut self, key: Vec<u8>) -> EncodeResult<Vec<u8>> {
        if !self.intern_keys {
            return Ok(key);
        }

        let offset = match self.keys.get(&key) {
            Some(&offset) => offset,
            None => {
                let offset = self.buf.len();
                self.buf.extend_from_slice(&key);
                self.keys.insert(key, offset);
                offset
            }
        };
        let mut pointer = Vec::with_capacity(5);
        write_pointer(&mut pointer, offset)?;
        Ok(pointer)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

struct Encoder<'s> {
    section: &'s mut DataSection,
}

type Unsupported = Impossible<Option<Vec<u8>>, MmdbError>;

// serde_json with `arbitrary_precision` serializes numbers as a one-field
// struct holding the number's text.
const JSON_NUMBER_TOKEN: &str = "$serde_json::private::Number";

impl Encoder<'_> {
    fn encode_number(&mut self, text: &str) -> EncodeResult<Option<Vec<u8>>> {
        if let Ok(v) = text.parse::<u64>() {
            return self.serialize_u64(v);
        }
        if let Ok(v) = text.parse::<i64>() {
            return self.serialize_i64(v);
        }
        if let Ok(v) = text.parse::<u128>() {
            return self.serialize_u128(v);
        }
        if let Ok(v) = text.parse::<i128>() {
            return self.serialize_i128(v);
        }
        match text.parse::<f64>() {
            Ok(v) => self.serialize_f64(v),
            Err(_) => Err(MmdbError::encoding(format!("invalid number {text}"))),
        }
    }
}

impl<'a, 's> Serializer for &'a mut Encoder<'s> {
    // `None` marks a value the format cannot hold (`Option::None`, unit).
    type Ok = Option<Vec<u8>>;
    type Error = MmdbError;

    type SerializeSeq = ArrayEncoder<'a, 's>;
    type SerializeTuple = ArrayEncoder<'a, 's>;
    type SerializeTupleStruct = ArrayEncoder<'a, 's>;
    type SerializeTupleVariant = Unsupported;
    type SerializeMap = MapEncoder<'a, 's>;
    type SerializeStruct = StructEncoder<'a, 's>;
    type SerializeStructVariant = Unsupported;

    fn serialize_bool(self, v: bool) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(2);
        write_control(&mut out, TYPE_BOOL, usize::from(v))?;
        Ok(Some(out))
    }

    fn serialize_i8(self, v: i8) -> EncodeResult<Self::Ok> {
        self.serialize_i32(v.into())
    }

    fn serialize_i16(self, v: i16) -> EncodeResult<Self::Ok> {
        self.serialize_i32(v.into())
    }

    fn serialize_i32(self, v: i32) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(6);
        if v < 0 {
            write_control(&mut out, TYPE_INT32, 4)?;
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            write_uint(&mut out, TYPE_INT32, v as u128)?;
        }
        Ok(Some(out))
    }

    fn serialize_i64(self, v: i64) -> EncodeResult<Self::Ok> {
        if let Ok(v) = i32::try_from(v) {
            return self.serialize_i32(v);
        }
        match u64::try_from(v) {
            Ok(v) => self.serialize_u64(v),
            Err(_) => Err(MmdbError::encoding(format!(
                "signed value {v} does not fit in int32"
            ))),
        }
    }

    fn serialize_i128(self, v: i128) -> EncodeResult<Self::Ok> {
        if let Ok(v) = i32::try_from(v) {
            return self.serialize_i32(v);
        }
        match u128::try_from(v) {
            Ok(v) => self.serialize_u128(v),
            Err(_) => Err(MmdbError::encoding(format!(
                "signed value {v} does not fit in int32"
            ))),
        }
    }

    fn serialize_u8(self, v: u8) -> EncodeResult<Self::Ok> {
        self.serialize_u16(v.into())
    }

    fn serialize_u16(self, v: u16) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(3);
        write_uint(&mut out, TYPE_UINT16, v.into())?;
        Ok(Some(out))
    }

    fn serialize_u32(self, v: u32) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(5);
        write_uint(&mut out, TYPE_UINT32, v.into())?;
        Ok(Some(out))
    }

    fn serialize_u64(self, v: u64) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(10);
        write_uint(&mut out, TYPE_UINT64, v.into())?;
        Ok(Some(out))
    }

    fn serialize_u128(self, v: u128) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(18);
        write_uint(&mut out, TYPE_UINT128, v)?;
        Ok(Some(out))
    }

    fn serialize_f32(self, v: f32) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(6);
        write_control(&mut out, TYPE_FLOAT, 4)?;
        out.extend_from_slice(&v.to_be_bytes());
        Ok(Some(out))
    }

    fn serialize_f64(self, v: f64) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(9);
        write_control(&mut out, TYPE_DOUBLE, 8)?;
        out.extend_from_slice(&v.to_be_bytes());
        Ok(Some(out))
    }

    fn serialize_char(self, v: char) -> EncodeResult<Self::Ok> {
        self.serialize_str(v.encode_utf8(&mut [0; 4]))
    }

    fn serialize_str(self, v: &str) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(v.len() + 4);
        write_control(&mut out, TYPE_STRING, v.len())?;
        out.extend_from_slice(v.as_bytes());
        Ok(Some(out))
    }

    fn serialize_bytes(self, v: &[u8]) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(v.len() + 4);
        write_control(&mut out, TYPE_BYTES, v.len())?;
        out.extend_from_slice(v);
        Ok(Some(out))
    }

    fn serialize_none(self) -> EncodeResult<Self::Ok> {
        Ok(None)
    }

    fn serialize_some<T>(self, value: &T) -> EncodeResult<Self::Ok>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> EncodeResult<Self::Ok> {
        Ok(None)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> EncodeResult<Self::Ok> {
        Ok(None)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> EncodeResult<Self::Ok> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> EncodeResult<Self::Ok>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> EncodeResult<Self::Ok>
    where
        T: ?Sized + Serialize,
    {
        let mut map = self.serialize_map(Some(1))?;
        map.serialize_entry(variant, value)?;
        map.end()
    }

    fn serialize_seq(self, _len: Option<usize>) -> EncodeResult<Self::SerializeSeq> {
        Ok(ArrayEncoder {
            enc: self,
            body: Vec::new(),
            count: 0,
        })
    }

    fn serialize_tuple(self, len: usize) -> EncodeResult<Self::SerializeTuple> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> EncodeResult<Self::SerializeTupleStruct> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> EncodeResult<Self::SerializeTupleVariant> {
        Err(MmdbError::encoding(format!(
            "tuple variant {name}::{variant} has no MaxMind DB representation"
        )))
    }

    fn serialize_map(self, _len: Option<usize>) -> EncodeResult<Self::SerializeMap> {
        Ok(MapEncoder {
            enc: self,
            body: Vec::new(),
            count: 0,
            key: None,
        })
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> EncodeResult<Self::SerializeStruct> {
        if name == JSON_NUMBER_TOKEN {
            return Ok(StructEncoder::Number {
                enc: self,
                encoded: None,
            });
        }
        self.serialize_map(Some(len)).map(StructEncoder::Map)
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> EncodeResult<Self::SerializeStructVariant> {
        Err(MmdbError::encoding(format!(
            "struct variant {name}::{variant} has no MaxMind DB representation"
        )))
    }
}

struct ArrayEncoder<'a, 's> {
    enc: &'a mut Encoder<'s>,
    body: Vec<u8>,
    count: usize,
}

impl ser::SerializeSeq for ArrayEncoder<'_, '_> {
    type Ok = Option<Vec<u8>>;
    type Error = MmdbError;

    fn serialize_element<T>(&mut self, value: &T) -> EncodeResult<()>
    where
        T: ?Sized + Serialize,
    {
        let encoded = value
            .serialize(&mut *self.enc)?
            .ok_or_else(|| MmdbError::encoding("arrays cannot hold absent values"))?;
        self.body.extend_from_slice(&encoded);
        self.count += 1;
        Ok(())
    }

    fn end(self) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(self.body.len() + 5);
        write_control(&mut out, TYPE_ARRAY, self.count)?;
        out.extend_from_slice(&self.body);
        Ok(Some(out))
    }
}

impl ser::SerializeTuple for ArrayEncoder<'_, '_> {
    type Ok = Option<Vec<u8>>;
    type Error = MmdbError;

    fn serialize_element<T>(&mut self, value: &T) -> EncodeResult<()>
    where
        T: ?Sized + Serialize,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> EncodeResult<Self::Ok> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for ArrayEncoder<'_, '_> {
    type Ok = Option<Vec<u8>>;
    type Error = MmdbError;

    fn serialize_field<T>(&mut self, value: &T) -> EncodeResult<()>
    where
        T: ?Sized + Serialize,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> EncodeResult<Self::Ok> {
        ser::SerializeSeq::end(self)
    }
}

struct MapEncoder<'a, 's> {
    enc: &'a mut Encoder<'s>,
    body: Vec<u8>,
    count: usize,
    key: Option<Vec<u8>>,
}

impl ser::SerializeMap for MapEncoder<'_, '_> {
    type Ok = Option<Vec<u8>>;
    type Error = MmdbError;

    fn serialize_key<T>(&mut self, key: &T) -> EncodeResult<()>
    where
        T: ?Sized + Serialize,
    {
        let encoded = key
            .serialize(&mut *self.enc)?
            .filter(|k| is_string(k))
            .ok_or_else(|| MmdbError::encoding("map keys must be strings"))?;
        self.key = Some(encoded);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> EncodeResult<()>
    where
        T: ?Sized + Serialize,
    {
        let key = self
            .key
            .take()
            .ok_or_else(|| MmdbError::encoding("map value serialized before its key"))?;

        // Entries without a representable value are left out of the map.
        if let Some(encoded) = value.serialize(&mut *self.enc)? {
            let key = self.enc.section.key_bytes(key)?;
            self.body.extend_from_slice(&key);
            self.body.extend_from_slice(&encoded);
            self.count += 1;
        }
        Ok(())
    }

    fn end(self) -> EncodeResult<Self::Ok> {
        let mut out = Vec::with_capacity(self.body.len() + 5);
        write_control(&mut out, TYPE_MAP, self.count)?;
        out.extend_from_slice(&self.body);
        Ok(Some(out))
    }
}

enum StructEncoder<'a, 's> {
    Map(MapEncoder<'a, 's>),
    Number {
        enc: &'a mut Encoder<'s>,
        encoded: Option<Vec<u8>>,
    },
}

impl ser::SerializeStruct for StructEncoder<'_, '_> {
    type Ok = Option<Vec<u8>>;
    type Error = MmdbError;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> EncodeResult<()>
    where
        T: ?Sized + Serialize,
    {
        match self {
            StructEncoder::Map(map) => ser::SerializeMap::serialize_entry(map, key, value),
            StructEncoder::Number { enc, encoded } => {
                let text = match serde_json::to_value(value)? {
                    Value::String(text) => text,
                    other => {
                        return Err(MmdbError::encoding(format!(
                            "unexpected JSON number representation {other}"
                        )))
                    }
                };
                *encoded = enc.encode_number(&text)?;
                Ok(())
            }
        }
    }

    fn end(self) -> EncodeResult<Self::Ok> {
        match self {
            StructEncoder::Map(map) => ser::SerializeMap::end(map),
            StructEncoder::Number { encoded, .. } => encoded
                .map(Some)
                .ok_or_else(|| MmdbError::encoding("JSON number without a value")),
        }
    }
}
