use std::cmp::Ordering;

use quiverdb_recordstore::{Codec, DecodeError, Reader};

use super::ColumnType;

/// A tagged value, mirroring the variants of [`ColumnType`].
///
/// Absence (a null cell) is represented as `Option<Value>` at the column
/// layer, not as a variant here.
#[derive(Debug, Clone)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    BoolVector(Vec<bool>),
    IntVector(Vec<i32>),
    LongVector(Vec<i64>),
    FloatVector(Vec<f32>),
    DoubleVector(Vec<f64>),
}

impl Value {
    pub fn type_of(&self) -> ColumnType {
        match self {
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Byte(_) => ColumnType::Byte,
            Value::Short(_) => ColumnType::Short,
            Value::Int(_) => ColumnType::Int,
            Value::Long(_) => ColumnType::Long,
            Value::Float(_) => ColumnType::Float,
            Value::Double(_) => ColumnType::Double,
            Value::String(_) => ColumnType::String,
            Value::BoolVector(v) => ColumnType::BoolVector(v.len() as u32),
            Value::IntVector(v) => ColumnType::IntVector(v.len() as u32),
            Value::LongVector(v) => ColumnType::LongVector(v.len() as u32),
            Value::FloatVector(v) => ColumnType::FloatVector(v.len() as u32),
            Value::DoubleVector(v) => ColumnType::DoubleVector(v.len() as u32),
        }
    }

    /// Numeric scalars promoted to `f64`; `None` for everything else.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Byte(v) => Some(v as f64),
            Value::Short(v) => Some(v as f64),
            Value::Int(v) => Some(v as f64),
            Value::Long(v) => Some(v as f64),
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Ordering between two values of the same type family. Numerics compare
    /// after promotion; floats with their total order so that sorting is
    /// deterministic. `None` across families.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Some(a.total_cmp(&b)),
                _ => None,
            },
        }
    }
}

/// Bit-exact equality on floats so that comparisons (CAS, kNN tie-breaks)
/// are deterministic.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (BoolVector(a), BoolVector(b)) => a == b,
            (IntVector(a), IntVector(b)) => a == b,
            (LongVector(a), LongVector(b)) => a == b,
            (FloatVector(a), FloatVector(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (DoubleVector(a), DoubleVector(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

/// Little-endian codec for one column's values. The column type is carried
/// by the codec, not the payload; decode rejects payloads of the wrong
/// shape.
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    ty: ColumnType,
}

impl ValueCodec {
    pub fn new(ty: ColumnType) -> Self {
        Self { ty }
    }
}

macro_rules! encode_vec {
    ($out:expr, $items:expr, bool) => {{
        $out.extend_from_slice(&($items.len() as u32).to_le_bytes());
        for item in $items {
            $out.push(*item as u8);
        }
    }};
    ($out:expr, $items:expr) => {{
        $out.extend_from_slice(&($items.len() as u32).to_le_bytes());
        for item in $items {
            $out.extend_from_slice(&item.to_le_bytes());
        }
    }};
}

macro_rules! decode_vec {
    ($r:expr, $get:ident) => {{
        let n = $r.get_u32()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push($r.$get()?);
        }
        out
    }};
}

impl Codec<Value> for ValueCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) {
        match value {
            Value::Boolean(v) => out.push(*v as u8),
            Value::Byte(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Short(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Long(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::String(v) => {
                out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                out.extend_from_slice(v.as_bytes());
            }
            Value::BoolVector(v) => encode_vec!(out, v, bool),
            Value::IntVector(v) => encode_vec!(out, v),
            Value::LongVector(v) => encode_vec!(out, v),
            Value::FloatVector(v) => encode_vec!(out, v),
            Value::DoubleVector(v) => encode_vec!(out, v),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        let mut r = Reader::new(bytes);
        let value = match self.ty {
            ColumnType::Boolean => Value::Boolean(r.get_u8()? != 0),
            ColumnType::Byte => Value::Byte(r.get_i8()?),
            ColumnType::Short => Value::Short(r.get_i16()?),
            ColumnType::Int => Value::Int(r.get_i32()?),
            ColumnType::Long => Value::Long(r.get_i64()?),
            ColumnType::Float => Value::Float(r.get_f32()?),
            ColumnType::Double => Value::Double(r.get_f64()?),
            ColumnType::String => {
                let n = r.get_u32()? as usize;
                let raw = r.get_bytes(n)?;
                Value::String(String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::Utf8)?)
            }
            ColumnType::BoolVector(_) => {
                let n = r.get_u32()? as usize;
                let mut out = Vec::with_capacity(n);
                for _ in 0..n {
                    out.push(r.get_u8()? != 0);
                }
                Value::BoolVector(out)
            }
            ColumnType::IntVector(_) => Value::IntVector(decode_vec!(r, get_i32)),
            ColumnType::LongVector(_) => Value::LongVector(decode_vec!(r, get_i64)),
            ColumnType::FloatVector(_) => Value::FloatVector(decode_vec!(r, get_f32)),
            ColumnType::DoubleVector(_) => Value::DoubleVector(decode_vec!(r, get_f64)),
        };
        r.expect_end()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn roundtrip(ty: ColumnType, value: Value) {
        let codec = ValueCodec::new(ty);
        let mut bytes = Vec::new();
        codec.encode(&value, &mut bytes);
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn scalar_roundtrips() {
        roundtrip(ColumnType::Boolean, Value::Boolean(true));
        roundtrip(ColumnType::Byte, Value::Byte(-3));
        roundtrip(ColumnType::Long, Value::Long(i64::MIN + 2));
        roundtrip(ColumnType::Double, Value::Double(f64::NEG_INFINITY));
        roundtrip(ColumnType::String, Value::String("snÖrkel".into()));
    }

    #[test]
    fn nan_is_bit_exact() {
        let a = Value::Float(f32::NAN);
        let b = Value::Float(f32::NAN);
        assert_eq!(a, b);
        assert_ne!(Value::Float(f32::NAN), Value::Float(-f32::NAN));
        roundtrip(ColumnType::Float, Value::Float(f32::NAN));
    }

    #[test]
    fn wrong_shape_rejected() {
        let codec = ValueCodec::new(ColumnType::Long);
        let mut bytes = Vec::new();
        codec.encode(&Value::Long(1), &mut bytes);
        bytes.push(0);
        assert_eq!(codec.decode(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    proptest! {
        #[test]
        fn float_vector_roundtrip(v in proptest::collection::vec(any::<f32>(), 0..64)) {
            roundtrip(ColumnType::FloatVector(v.len() as u32), Value::FloatVector(v));
        }

        #[test]
        fn string_roundtrip(s in ".*") {
            roundtrip(ColumnType::String, Value::String(s));
        }
    }
}
