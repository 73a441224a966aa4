//! ビッグエンディアンのビットバッファ
//!
//! 複数ピースに分割された値をビット単位で連結するための小さなバッファです。
//! ビットは常に最上位側から順に追加され、最終的にホスト整数へ変換されます。

use crate::{Error, Result};

/// ビット連結バッファ（最大64ビット）
#[derive(Debug, Default)]
pub struct BitBuffer {
    bits: u64,
    bit_count: u64,
}

impl BitBuffer {
    /// 空のバッファを作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 現在のビット数を取得する
    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// ゼロビットを追加する（左詰めパディング用）
    pub fn add_zero_bits(&mut self, count: u64) -> Result<()> {
        if self.bit_count + count > 64 {
            return Err(Error::Unsupported);
        }
        self.bits <<= count;
        self.bit_count += count;
        Ok(())
    }

    /// バイト列の一部をビット単位で追加する
    ///
    /// `bytes` はビッグエンディアンのビット列として解釈され、`bit_offset`
    /// から `bit_size` ビットが追加されます（ビット番号は先頭バイトの
    /// 最上位ビットを0とする）。
    pub fn add_bits(&mut self, bytes: &[u8], bit_offset: u64, bit_size: u64) -> Result<()> {
        if self.bit_count + bit_size > 64 {
            return Err(Error::Unsupported);
        }
        if bit_offset + bit_size > bytes.len() as u64 * 8 {
            return Err(Error::BadValue);
        }

        for i in 0..bit_size {
            let absolute = bit_offset + i;
            let byte = bytes[(absolute / 8) as usize];
            let bit = (byte >> (7 - (absolute % 8))) & 1;
            self.bits = (self.bits << 1) | bit as u64;
        }
        self.bit_count += bit_size;
        Ok(())
    }

    /// 連結したビット列をホスト整数として取得する（右詰め）
    pub fn value(&self) -> u64 {
        self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_bits_full_bytes() {
        let mut buffer = BitBuffer::new();
        buffer.add_bits(&[0x12, 0x34], 0, 16).unwrap();
        assert_eq!(buffer.value(), 0x1234);
        assert_eq!(buffer.bit_count(), 16);
    }

    #[test]
    fn test_add_bits_with_offset() {
        // 0xF0 = 1111_0000: オフセット4から4ビット -> 0000
        let mut buffer = BitBuffer::new();
        buffer.add_bits(&[0xF0], 4, 4).unwrap();
        assert_eq!(buffer.value(), 0);
        assert_eq!(buffer.bit_count(), 4);
    }

    #[test]
    fn test_zero_padding_then_bits() {
        let mut buffer = BitBuffer::new();
        buffer.add_zero_bits(8).unwrap();
        buffer.add_bits(&[0xFF], 0, 8).unwrap();
        assert_eq!(buffer.value(), 0x00FF);
        assert_eq!(buffer.bit_count(), 16);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut buffer = BitBuffer::new();
        buffer.add_bits(&[0xAA; 8], 0, 64).unwrap();
        assert_eq!(buffer.add_bits(&[0x01], 0, 1), Err(Error::Unsupported));
    }

    #[test]
    fn test_two_piece_concatenation() {
        let mut buffer = BitBuffer::new();
        buffer.add_bits(&[0xDE, 0xAD], 0, 16).unwrap();
        buffer.add_bits(&[0xBE, 0xEF], 0, 16).unwrap();
        assert_eq!(buffer.value(), 0xDEAD_BEEF);
    }
}
