use crate::codec::Value;
use crate::err_at;
use crate::error::{Error, Result};

/// A sort-preserving codec for one logical type.
///
/// `index` selects composite-key mode: variable-width encodings append a
/// `NUL` terminator so no encoded value is ever a byte-prefix of another,
/// which is what lets `append_last`/`extract_last` glue several packed
/// fields onto one physical key and still peel the last one back off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Packer {
    Uint32,
    Uint16,
    Uint8,
    Int32,
    Int16,
    Float,
    Str,
    Dict,
    Obj,
    Revision,
}

const INT32_OFFSET: u32 = 1 << 31;
const INT16_OFFSET: u16 = 1 << 15;

impl Packer {
    /// String identifier stored in collection/index metadata.
    pub fn identifier(&self) -> &'static str {
        match self {
            Packer::Uint32 => "uint32",
            Packer::Uint16 => "uint16",
            Packer::Uint8 => "uint8",
            Packer::Int32 => "int32",
            Packer::Int16 => "int16",
            Packer::Float => "float",
            Packer::Str => "string",
            Packer::Dict => "dict",
            Packer::Obj => "obj",
            Packer::Revision => "revision",
        }
    }

    pub fn from_identifier(id: &str) -> Result<Packer> {
        match id {
            "uint32" => Ok(Packer::Uint32),
            "uint16" => Ok(Packer::Uint16),
            "uint8" => Ok(Packer::Uint8),
            "int32" => Ok(Packer::Int32),
            "int16" => Ok(Packer::Int16),
            "float" => Ok(Packer::Float),
            "string" => Ok(Packer::Str),
            "dict" => Ok(Packer::Dict),
            "obj" => Ok(Packer::Obj),
            "revision" => Ok(Packer::Revision),
            _ => err_at!(DataError, msg: "unknown codec identifier {:?}", id),
        }
    }

    /// Encode `value` to its sort-preserving byte representation.
    pub fn pack(&self, value: &Value, index: bool) -> Result<Vec<u8>> {
        match (self, value) {
            (Packer::Uint32, Value::Uint32(v)) => Ok(v.to_be_bytes().to_vec()),
            (Packer::Uint16, Value::Uint16(v)) => Ok(v.to_be_bytes().to_vec()),
            (Packer::Uint8, Value::Uint8(v)) => Ok(vec![*v]),
            (Packer::Int32, Value::Int32(v)) => {
                let offset = (*v as i64 + INT32_OFFSET as i64) as u32;
                Ok(offset.to_be_bytes().to_vec())
            }
            (Packer::Int16, Value::Int16(v)) => {
                let offset = (*v as i32 + INT16_OFFSET as i32) as u16;
                Ok(offset.to_be_bytes().to_vec())
            }
            (Packer::Float, Value::Float(v)) => {
                let bits = v.to_bits();
                let t = if bits & 0x8000_0000 != 0 {
                    !bits
                } else {
                    bits | 0x8000_0000
                };
                Ok(t.to_be_bytes().to_vec())
            }
            (Packer::Str, Value::Str(v)) => {
                let mut out = v.as_bytes().to_vec();
                if index {
                    out.push(0x00);
                }
                Ok(out)
            }
            (Packer::Revision, Value::Revision(v)) => {
                Ok((u32::MAX - v).to_be_bytes().to_vec())
            }
            (Packer::Dict, Value::Obj(v)) | (Packer::Obj, Value::Obj(v)) => {
                if index {
                    return err_at!(DataError, msg: "dict/obj cannot be an index field");
                }
                let mut out = Vec::new();
                err_at!(DataError, rmp_serde::encode::write(&mut out, v))?;
                Ok(out)
            }
            (packer, value) => err_at!(
                DataError,
                msg: "packer {:?} cannot encode value {:?}",
                packer,
                value
            ),
        }
    }

    /// Decode bytes previously produced by [Packer::pack].
    pub fn unpack(&self, bytes: &[u8], index: bool) -> Result<Value> {
        match self {
            Packer::Uint32 => {
                let arr: [u8; 4] = err_at!(FailConvert, bytes.try_into())?;
                Ok(Value::Uint32(u32::from_be_bytes(arr)))
            }
            Packer::Uint16 => {
                let arr: [u8; 2] = err_at!(FailConvert, bytes.try_into())?;
                Ok(Value::Uint16(u16::from_be_bytes(arr)))
            }
            Packer::Uint8 => {
                if bytes.len() != 1 {
                    return err_at!(FailConvert, msg: "uint8 needs exactly 1 byte, got {}", bytes.len());
                }
                Ok(Value::Uint8(bytes[0]))
            }
            Packer::Int32 => {
                let arr: [u8; 4] = err_at!(FailConvert, bytes.try_into())?;
                let offset = u32::from_be_bytes(arr);
                let v = offset as i64 - INT32_OFFSET as i64;
                Ok(Value::Int32(v as i32))
            }
            Packer::Int16 => {
                let arr: [u8; 2] = err_at!(FailConvert, bytes.try_into())?;
                let offset = u16::from_be_bytes(arr);
                let v = offset as i32 - INT16_OFFSET as i32;
                Ok(Value::Int16(v as i16))
            }
            Packer::Float => {
                let arr: [u8; 4] = err_at!(FailConvert, bytes.try_into())?;
                let t = u32::from_be_bytes(arr);
                let bits = if t & 0x8000_0000 != 0 { t & 0x7fff_ffff } else { !t };
                Ok(Value::Float(f32::from_bits(bits)))
            }
            Packer::Str => {
                let s = if index && bytes.last() == Some(&0x00) {
                    &bytes[..bytes.len() - 1]
                } else {
                    bytes
                };
                let s = err_at!(DataError, String::from_utf8(s.to_vec()))?;
                Ok(Value::Str(s))
            }
            Packer::Revision => {
                let arr: [u8; 4] = err_at!(FailConvert, bytes.try_into())?;
                let t = u32::from_be_bytes(arr);
                Ok(Value::Revision(u32::MAX - t))
            }
            Packer::Dict | Packer::Obj => {
                if index {
                    return err_at!(DataError, msg: "dict/obj cannot be an index field");
                }
                let v: rmpv::Value = err_at!(DataError, rmp_serde::from_slice(bytes))?;
                Ok(Value::Obj(v))
            }
        }
    }

    /// Whether this packer's encoding is a fixed number of bytes.
    pub fn is_fixed_width(&self) -> bool {
        matches!(
            self,
            Packer::Uint32
                | Packer::Uint16
                | Packer::Uint8
                | Packer::Int32
                | Packer::Int16
                | Packer::Float
                | Packer::Revision
        )
    }

    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Packer::Uint32 | Packer::Int32 | Packer::Float | Packer::Revision => Some(4),
            Packer::Uint16 | Packer::Int16 => Some(2),
            Packer::Uint8 => Some(1),
            Packer::Str | Packer::Dict | Packer::Obj => None,
        }
    }

    /// Append `pack(value, true)` onto `prefix`, trailing a length byte for
    /// variable-width encodings so [Packer::extract_last] can peel it back
    /// off a composite key built by repeated `append_last` calls.
    pub fn append_last(&self, prefix: &[u8], value: &Value) -> Result<Vec<u8>> {
        let packed = self.pack(value, true)?;
        let mut out = Vec::with_capacity(prefix.len() + packed.len() + 1);
        out.extend_from_slice(prefix);
        out.extend_from_slice(&packed);
        if !self.is_fixed_width() {
            let len = err_at!(FailConvert, u8::try_from(packed.len()))?;
            out.push(len);
        }
        Ok(out)
    }

    /// Inverse of [Packer::append_last]: split `bytes` into the remaining
    /// prefix and the decoded trailing value.
    pub fn extract_last(&self, bytes: &[u8]) -> Result<(Vec<u8>, Value)> {
        match self.fixed_width() {
            Some(width) => {
                if bytes.len() < width {
                    return err_at!(FailConvert, msg: "key too short for {:?}", self);
                }
                let split = bytes.len() - width;
                let value = self.unpack(&bytes[split..], true)?;
                Ok((bytes[..split].to_vec(), value))
            }
            None => {
                let len_byte = *bytes
                    .last()
                    .ok_or_else(|| Error::FailConvert("empty key".to_string()))?;
                let width = len_byte as usize;
                if bytes.len() < width + 1 {
                    return err_at!(FailConvert, msg: "key too short for {:?}", self);
                }
                let split = bytes.len() - width - 1;
                let packed = &bytes[split..bytes.len() - 1];
                let value = self.unpack(packed, true)?;
                Ok((bytes[..split].to_vec(), value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: Packer, v: Value) {
        let bytes = p.pack(&v, false).unwrap();
        let back = p.unpack(&bytes, false).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn test_uint_roundtrip() {
        roundtrip(Packer::Uint32, Value::Uint32(42));
        roundtrip(Packer::Uint16, Value::Uint16(42));
        roundtrip(Packer::Uint8, Value::Uint8(42));
    }

    #[test]
    fn test_uint32_order_preserving() {
        let a = Packer::Uint32.pack(&Value::Uint32(1), false).unwrap();
        let b = Packer::Uint32.pack(&Value::Uint32(2), false).unwrap();
        let c = Packer::Uint32.pack(&Value::Uint32(u32::MAX), false).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_int32_order_preserving() {
        let neg = Packer::Int32.pack(&Value::Int32(-5), false).unwrap();
        let zero = Packer::Int32.pack(&Value::Int32(0), false).unwrap();
        let pos = Packer::Int32.pack(&Value::Int32(5), false).unwrap();
        assert!(neg < zero);
        assert!(zero < pos);
        roundtrip(Packer::Int32, Value::Int32(i32::MIN));
        roundtrip(Packer::Int32, Value::Int32(i32::MAX));
        roundtrip(Packer::Int32, Value::Int32(-1));
    }

    #[test]
    fn test_int16_roundtrip_and_order() {
        let neg = Packer::Int16.pack(&Value::Int16(-5), false).unwrap();
        let pos = Packer::Int16.pack(&Value::Int16(5), false).unwrap();
        assert!(neg < pos);
        roundtrip(Packer::Int16, Value::Int16(i16::MIN));
        roundtrip(Packer::Int16, Value::Int16(i16::MAX));
    }

    #[test]
    fn test_float_order_preserving() {
        let vals = [-2.0f32, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0];
        let mut packed: Vec<Vec<u8>> = vals
            .iter()
            .map(|v| Packer::Float.pack(&Value::Float(*v), false).unwrap())
            .collect();
        let sorted = {
            let mut s = packed.clone();
            s.sort();
            s
        };
        assert_eq!(packed, sorted, "packed floats must already be in sorted order");
        packed.dedup();
        for (v, p) in vals.iter().zip(
            vals.iter()
                .map(|v| Packer::Float.pack(&Value::Float(*v), false).unwrap()),
        ) {
            let back = Packer::Float.unpack(&p, false).unwrap();
            assert_eq!(Value::Float(*v), back);
        }
    }

    #[test]
    fn test_str_index_mode_appends_nul() {
        let packed = Packer::Str.pack(&Value::Str("abc".into()), true).unwrap();
        assert_eq!(packed, b"abc\x00");
        let back = Packer::Str.unpack(&packed, true).unwrap();
        assert_eq!(back, Value::Str("abc".into()));
    }

    #[test]
    fn test_append_extract_last_fixed_width() {
        let prefix = b"coll".to_vec();
        let appended = Packer::Uint32
            .append_last(&prefix, &Value::Uint32(7))
            .unwrap();
        let (rest, value) = Packer::Uint32.extract_last(&appended).unwrap();
        assert_eq!(rest, prefix);
        assert_eq!(value, Value::Uint32(7));
    }

    #[test]
    fn test_append_extract_last_string() {
        let prefix = b"idx:".to_vec();
        let appended = Packer::Str
            .append_last(&prefix, &Value::Str("hello".into()))
            .unwrap();
        let (rest, value) = Packer::Str.extract_last(&appended).unwrap();
        assert_eq!(rest, prefix);
        assert_eq!(value, Value::Str("hello".into()));
    }

    #[test]
    fn test_revision_pack_is_descending() {
        let r1 = Packer::Revision.pack(&Value::Revision(1), false).unwrap();
        let r2 = Packer::Revision.pack(&Value::Revision(2), false).unwrap();
        assert!(r2 < r1, "higher revisions sort first");
        let back = Packer::Revision.unpack(&r1, false).unwrap();
        assert_eq!(back, Value::Revision(1));
    }

    #[test]
    fn test_from_identifier_roundtrip() {
        for p in [
            Packer::Uint32,
            Packer::Uint16,
            Packer::Uint8,
            Packer::Int32,
            Packer::Int16,
            Packer::Float,
            Packer::Str,
            Packer::Dict,
            Packer::Obj,
            Packer::Revision,
        ] {
            let id = p.identifier();
            assert_eq!(Packer::from_identifier(id).unwrap(), p);
        }
    }

    #[test]
    fn test_unknown_identifier_errors() {
        assert!(Packer::from_identifier("bogus").is_err());
    }

    // TODO: repeatable randoms.
    #[test]
    fn test_arbitrary_fuzz_order_preservation() {
        use arbitrary::Unstructured;
        use rand::{prelude::random, rngs::StdRng, Rng, SeedableRng};

        let seed: u64 = random();
        let mut rng = StdRng::seed_from_u64(seed);
        println!("test_arbitrary_fuzz_order_preservation seed {}", seed);

        let mut ints: Vec<i32> = (0..100)
            .map(|_| {
                let bytes = rng.gen::<[u8; 8]>();
                Unstructured::new(&bytes).arbitrary::<i32>().unwrap()
            })
            .collect();
        ints.sort();
        let packed: Vec<Vec<u8>> = ints
            .iter()
            .map(|v| Packer::Int32.pack(&Value::Int32(*v), false).unwrap())
            .collect();
        let mut sorted_packed = packed.clone();
        sorted_packed.sort();
        assert_eq!(packed, sorted_packed);
        for (v, p) in ints.iter().zip(packed.iter()) {
            assert_eq!(Packer::Int32.unpack(p, false).unwrap(), Value::Int32(*v));
        }
    }

    // TODO: repeatable randoms.
    #[test]
    fn test_random_order_preservation() {
        use rand::prelude::random;

        let mut ints: Vec<i32> = (0..200).map(|_| random::<i32>()).collect();
        ints.sort();
        let packed: Vec<Vec<u8>> = ints
            .iter()
            .map(|v| Packer::Int32.pack(&Value::Int32(*v), false).unwrap())
            .collect();
        let mut sorted_packed = packed.clone();
        sorted_packed.sort();
        assert_eq!(packed, sorted_packed, "Int32 packing must preserve numeric order");
        for (v, p) in ints.iter().zip(packed.iter()) {
            assert_eq!(Packer::Int32.unpack(p, false).unwrap(), Value::Int32(*v));
        }

        let mut floats: Vec<f32> = (0..200)
            .map(|_| random::<i32>() as f32 / 17.0)
            .collect();
        floats.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let packed: Vec<Vec<u8>> = floats
            .iter()
            .map(|v| Packer::Float.pack(&Value::Float(*v), false).unwrap())
            .collect();
        let mut sorted_packed = packed.clone();
        sorted_packed.sort();
        assert_eq!(packed, sorted_packed, "Float packing must preserve numeric order");
        for (v, p) in floats.iter().zip(packed.iter()) {
            assert_eq!(Packer::Float.unpack(p, false).unwrap(), Value::Float(*v));
        }
    }
}
