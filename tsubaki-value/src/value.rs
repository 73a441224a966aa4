//! デコード済みの値
//!
//! ロケーションから読み取られ、型に従ってデコードされたスカラー値です。
//! 一度構築された値は変更されません（再解決時は丸ごと差し替え）。

use std::fmt;

/// ローダーに要求する値の型（Cライクな型コード相当）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl ValueType {
    /// 型のビット幅を取得する
    pub fn bit_size(&self) -> u64 {
        match self {
            ValueType::Bool | ValueType::Int8 | ValueType::UInt8 => 8,
            ValueType::Int16 | ValueType::UInt16 => 16,
            ValueType::Int32 | ValueType::UInt32 | ValueType::Float32 => 32,
            ValueType::Int64 | ValueType::UInt64 | ValueType::Float64 => 64,
        }
    }

    /// 型のバイト幅を取得する
    pub fn byte_size(&self) -> u64 {
        self.bit_size() / 8
    }

    /// 符号付き整数か
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ValueType::Int8 | ValueType::Int16 | ValueType::Int32 | ValueType::Int64
        )
    }

    /// 整数（またはブール）か
    pub fn is_integer(&self) -> bool {
        !matches!(self, ValueType::Float32 | ValueType::Float64)
    }

    /// 浮動小数点か
    pub fn is_float(&self) -> bool {
        matches!(self, ValueType::Float32 | ValueType::Float64)
    }

    /// バイトサイズから符号付き整数型を推測する（列挙型の幅推測用）
    pub fn signed_of_byte_size(byte_size: u64) -> ValueType {
        match byte_size {
            1 => ValueType::Int8,
            2 => ValueType::Int16,
            8 => ValueType::Int64,
            _ => ValueType::Int32,
        }
    }
}

/// デコード済みのスカラー値
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    /// ポインタ・参照の値
    Address(u64),
    /// NUL終端文字列
    String(String),
    /// 列挙型の値（名前が分かれば格納する）
    Enumeration { name: Option<String>, value: i64 },
}

impl Value {
    /// ビット列（ホスト表現）と要求型から値を構築する
    ///
    /// 符号付き型は幅に応じて符号拡張されます。
    pub fn from_bits(bits: u64, value_type: ValueType) -> Value {
        match value_type {
            ValueType::Bool => Value::Bool(bits != 0),
            ValueType::Int8 => Value::Int8(bits as u8 as i8),
            ValueType::UInt8 => Value::UInt8(bits as u8),
            ValueType::Int16 => Value::Int16(bits as u16 as i16),
            ValueType::UInt16 => Value::UInt16(bits as u16),
            ValueType::Int32 => Value::Int32(bits as u32 as i32),
            ValueType::UInt32 => Value::UInt32(bits as u32),
            ValueType::Int64 => Value::Int64(bits as i64),
            ValueType::UInt64 => Value::UInt64(bits),
            ValueType::Float32 => Value::Float(f32::from_bits(bits as u32)),
            ValueType::Float64 => Value::Double(f64::from_bits(bits)),
        }
    }

    /// 値をアドレスとして解釈する（ポインタの指す先の解決に使う）
    pub fn to_address(&self) -> Option<u64> {
        match self {
            Value::Address(address) => Some(*address),
            Value::UInt64(v) => Some(*v),
            Value::Int64(v) => Some(*v as u64),
            Value::UInt32(v) => Some(*v as u64),
            Value::Int32(v) => Some(*v as u64),
            _ => None,
        }
    }

    /// 値を符号付き整数として解釈する（列挙子との照合等に使う）
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int8(v) => Some(*v as i64),
            Value::UInt8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::UInt16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::UInt32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => Some(*v as i64),
            Value::Address(v) => Some(*v as i64),
            Value::Enumeration { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// 値のビッグエンディアンのバイト像を取得する（書き戻し用）
    ///
    /// 文字列など書き戻せない値は None を返します。
    pub fn to_be_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bool(b) => Some(vec![*b as u8]),
            Value::Int8(v) => Some(v.to_be_bytes().to_vec()),
            Value::UInt8(v) => Some(v.to_be_bytes().to_vec()),
            Value::Int16(v) => Some(v.to_be_bytes().to_vec()),
            Value::UInt16(v) => Some(v.to_be_bytes().to_vec()),
            Value::Int32(v) => Some(v.to_be_bytes().to_vec()),
            Value::UInt32(v) => Some(v.to_be_bytes().to_vec()),
            Value::Int64(v) => Some(v.to_be_bytes().to_vec()),
            Value::UInt64(v) => Some(v.to_be_bytes().to_vec()),
            Value::Float(v) => Some(v.to_bits().to_be_bytes().to_vec()),
            Value::Double(v) => Some(v.to_bits().to_be_bytes().to_vec()),
            Value::Address(v) => Some(v.to_be_bytes().to_vec()),
            Value::Enumeration { value, .. } => Some(value.to_be_bytes().to_vec()),
            Value::String(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int8(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Address(address) => write!(f, "0x{:x}", address),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Enumeration {
                name: Some(name),
                value,
            } => write!(f, "{} ({})", name, value),
            Value::Enumeration { name: None, value } => write!(f, "{}", value),
        }
    }
}
