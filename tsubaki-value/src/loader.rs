//! 値ローダー
//!
//! `ValueLocation` とターゲットへの生アクセスから、要求された型のスカラー
//! 値を組み立てます。ピースごとにビッグエンディアンへ正規化してビット
//! バッファに連結し、最後にホスト表現へ変換します。

use crate::bits::BitBuffer;
use crate::location::{PieceKind, ValueLocation};
use crate::traits::{Architecture, CpuState, TargetMemory, TypeInformation};
use crate::types::{Type, TypeLookupConstraints};
use crate::value::{Value, ValueType};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// 1ピースの最大バイトサイズ
pub const MAX_PIECE_SIZE: u64 = 16;

/// 文字列読み取りの最大長
pub const MAX_STRING_LENGTH: usize = 255;

/// 値ローダー
///
/// コレボレータを `Arc` で保持するため、ワーカースレッドへ安価に
/// 複製できます。
#[derive(Clone)]
pub struct ValueLoader {
    architecture: Arc<dyn Architecture>,
    memory: Arc<dyn TargetMemory>,
    cpu_state: Arc<dyn CpuState>,
    type_information: Arc<dyn TypeInformation>,
}

impl ValueLoader {
    /// 新しいローダーを作成する
    pub fn new(
        architecture: Arc<dyn Architecture>,
        memory: Arc<dyn TargetMemory>,
        cpu_state: Arc<dyn CpuState>,
        type_information: Arc<dyn TypeInformation>,
    ) -> Self {
        Self {
            architecture,
            memory,
            cpu_state,
            type_information,
        }
    }

    /// アーキテクチャ記述を取得する
    pub fn architecture(&self) -> &dyn Architecture {
        self.architecture.as_ref()
    }

    /// ロケーションから要求型の値を読み取る
    ///
    /// `short_value_ok` が true の場合、ロケーションの総ビット数が要求型の
    /// ビット幅より小さくても、上位をゼロ拡張して読み取ります（ブールや
    /// 列挙型で使用）。
    pub fn load_value(
        &self,
        location: &ValueLocation,
        value_type: ValueType,
        short_value_ok: bool,
    ) -> Result<Value> {
        let type_bits = value_type.bit_size();

        // 検証パス: ピース種別・サイズと総ビット数を確認する
        let mut total_bits: u64 = 0;
        for piece in location.pieces() {
            match piece.kind {
                PieceKind::Invalid | PieceKind::Unknown => return Err(Error::EntryNotFound),
                PieceKind::Memory(_) | PieceKind::Register(_) => {}
            }
            if piece.size > MAX_PIECE_SIZE {
                return Err(Error::Unsupported);
            }
            total_bits += piece.bit_size;
        }

        if total_bits == 0 {
            return Err(Error::EntryNotFound);
        }
        if total_bits > 64 {
            return Err(Error::Unsupported);
        }
        if total_bits < type_bits && !short_value_ok {
            return Err(Error::BadValue);
        }

        // 組み立てパス: ビッグエンディアンのビット列として連結する
        let mut buffer = BitBuffer::new();
        if total_bits < type_bits {
            buffer.add_zero_bits(type_bits - total_bits)?;
        }

        for piece in location.pieces() {
            let bytes = match piece.kind {
                PieceKind::Memory(address) => self.read_piece_bytes(address, piece.size)?,
                PieceKind::Register(index) => self.read_register_bytes(index, piece.size)?,
                PieceKind::Invalid | PieceKind::Unknown => unreachable!(),
            };
            buffer.add_bits(&bytes, piece.bit_offset, piece.bit_size)?;
        }

        let bits = buffer.value();
        debug!("loaded {} bits as {:?}: 0x{:x}", total_bits, value_type, bits);
        Ok(Value::from_bits(bits, value_type))
    }

    /// メモリから生のバイト列を読み取る
    ///
    /// 要求バイト数ちょうどを読み取れない場合はエラーになります。
    pub fn load_raw_value(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let read = self.memory.read_memory(address, &mut buffer)?;
        if read != size {
            return Err(Error::BadAddress(address));
        }
        Ok(buffer)
    }

    /// NUL終端文字列を読み取る
    ///
    /// 呼び出し側の要求に関わらず、長さは `MAX_STRING_LENGTH` で打ち切り
    /// ます。
    pub fn load_string_value(&self, address: u64, max_length: usize) -> Result<String> {
        let capped = max_length.min(MAX_STRING_LENGTH);
        self.memory.read_memory_string(address, capped)
    }

    /// 名前から型を検索する（型情報コレボレータへの委譲）
    pub fn lookup_type_by_name(
        &self,
        name: &str,
        constraints: &TypeLookupConstraints,
    ) -> Result<Arc<Type>> {
        self.type_information.lookup_type_by_name(name, constraints)
    }

    /// メモリピースをビッグエンディアンのバイト列として読み取る
    fn read_piece_bytes(&self, address: u64, size: u64) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size as usize];
        let read = self.memory.read_memory(address, &mut buffer)?;
        if read != buffer.len() {
            return Err(Error::BadAddress(address));
        }
        if !self.architecture.is_big_endian() {
            buffer.reverse();
        }
        Ok(buffer)
    }

    /// レジスタピースをビッグエンディアンのバイト列として読み取る
    fn read_register_bytes(&self, index: u16, size: u64) -> Result<Vec<u8>> {
        if size > 8 {
            return Err(Error::Unsupported);
        }
        let register = self
            .architecture
            .register_by_index(index)
            .ok_or(Error::EntryNotFound)?;
        let value = self
            .cpu_state
            .register_value(register)
            .ok_or(Error::EntryNotFound)?;

        // ホスト整数のビッグエンディアン像の下位 `size` バイトがピースの値
        let image = value.to_be_bytes();
        Ok(image[(8 - size as usize)..].to_vec())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::location::ValuePiece;

    #[test]
    fn test_load_single_memory_piece_little_endian() {
        // リトルエンディアンのメモリ上の 01 00 00 00 は int32 の 1
        let loader = loader_with_memory(0x1000, vec![0x01, 0x00, 0x00, 0x00]);
        let location = ValueLocation::from_memory(0x1000, 4);
        let value = loader
            .load_value(&location, ValueType::Int32, false)
            .unwrap();
        assert_eq!(value, Value::Int32(1));
    }

    #[test]
    fn test_load_big_endian_piece_assembly() {
        // 2つの4バイトメモリピース。各ピースはリトルエンディアンで格納
        // されており、ビッグエンディアン変換後に連結される
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        data[4..8].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
        let loader = loader_with_memory(0x1000, data);

        let location = ValueLocation::from_pieces(vec![
            ValuePiece::memory(0x1000, 4),
            ValuePiece::memory(0x1004, 4),
        ]);
        let value = loader
            .load_value(&location, ValueType::UInt64, false)
            .unwrap();
        assert_eq!(value, Value::UInt64(0xDEAD_BEEF_CAFE_BABE));
    }

    #[test]
    fn test_load_register_piece() {
        let cpu = Arc::new(MockCpuState::new(&[(0, 0x1234_5678_9ABC_DEF0)]));
        let memory = Arc::new(MockMemory::new(0, vec![]));
        let loader = loader_with(memory, cpu);

        let location = ValueLocation::from_register(0, 8);
        let value = loader
            .load_value(&location, ValueType::UInt64, false)
            .unwrap();
        assert_eq!(value, Value::UInt64(0x1234_5678_9ABC_DEF0));

        // 下位4バイトのみのピース
        let location = ValueLocation::from_register(0, 4);
        let value = loader
            .load_value(&location, ValueType::UInt32, false)
            .unwrap();
        assert_eq!(value, Value::UInt32(0x9ABC_DEF0));
    }

    #[test]
    fn test_load_rejects_empty_location() {
        let loader = loader_with_memory(0, vec![]);
        let location = ValueLocation::new();
        assert_eq!(
            loader.load_value(&location, ValueType::Int32, false),
            Err(Error::EntryNotFound)
        );
    }

    #[test]
    fn test_load_rejects_invalid_piece_kinds() {
        let loader = loader_with_memory(0, vec![0; 8]);
        for kind in [PieceKind::Invalid, PieceKind::Unknown] {
            let location = ValueLocation::from_pieces(vec![ValuePiece {
                kind,
                bit_offset: 0,
                bit_size: 32,
                size: 4,
            }]);
            assert_eq!(
                loader.load_value(&location, ValueType::Int32, false),
                Err(Error::EntryNotFound)
            );
        }
    }

    #[test]
    fn test_load_rejects_oversized_piece() {
        let loader = loader_with_memory(0x1000, vec![0; 32]);
        let location = ValueLocation::from_memory(0x1000, 17);
        assert_eq!(
            loader.load_value(&location, ValueType::UInt64, false),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn test_load_rejects_total_over_64_bits() {
        let loader = loader_with_memory(0x1000, vec![0; 32]);
        let location = ValueLocation::from_pieces(vec![
            ValuePiece::memory(0x1000, 8),
            ValuePiece::memory(0x1008, 8),
        ]);
        assert_eq!(
            loader.load_value(&location, ValueType::UInt64, false),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn test_short_value_requires_opt_in() {
        let loader = loader_with_memory(0x1000, vec![0x01]);
        let location = ValueLocation::from_memory(0x1000, 1);

        // 8ビットしかないのに32ビットを要求
        assert_eq!(
            loader.load_value(&location, ValueType::Int32, false),
            Err(Error::BadValue)
        );

        // short_value_ok ならゼロ拡張して成功する
        let value = loader
            .load_value(&location, ValueType::Int32, true)
            .unwrap();
        assert_eq!(value, Value::Int32(1));
    }

    #[test]
    fn test_load_string_value_capped() {
        let mut data = vec![b'a'; 300];
        data.push(0);
        let loader = loader_with_memory(0x1000, data);

        let s = loader.load_string_value(0x1000, 1024).unwrap();
        assert_eq!(s.len(), MAX_STRING_LENGTH);
    }

    #[test]
    fn test_load_raw_value_exact() {
        let loader = loader_with_memory(0x1000, vec![1, 2, 3, 4]);
        assert_eq!(loader.load_raw_value(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(loader.load_raw_value(0x1000, 8).is_err());
    }
}
