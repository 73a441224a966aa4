//! 値のロケーション
//!
//! 値のバイト列が物理的にどこへ格納されているかを表します。レジスタまたは
//! メモリのピースの列で、ピースの並び順はビッグエンディアン（最上位の
//! ピースが先頭）です。

/// ピースの格納先の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    /// 無効なピース
    Invalid,
    /// 格納先が不明（最適化で消えた等）
    Unknown,
    /// メモリアドレス
    Memory(u64),
    /// レジスタ番号（DWARF番号）
    Register(u16),
}

/// 値のロケーションを構成する1ピース
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePiece {
    /// 格納先
    pub kind: PieceKind,
    /// ピース内のビットオフセット
    pub bit_offset: u64,
    /// 値として使うビット数
    pub bit_size: u64,
    /// ピースのバイトサイズ
    pub size: u64,
}

impl ValuePiece {
    /// メモリピースを作成する（バイト境界、フルサイズ）
    pub fn memory(address: u64, byte_size: u64) -> Self {
        Self {
            kind: PieceKind::Memory(address),
            bit_offset: 0,
            bit_size: byte_size * 8,
            size: byte_size,
        }
    }

    /// レジスタピースを作成する（バイト境界、フルサイズ）
    pub fn register(index: u16, byte_size: u64) -> Self {
        Self {
            kind: PieceKind::Register(index),
            bit_offset: 0,
            bit_size: byte_size * 8,
            size: byte_size,
        }
    }

    /// このピースへ書き込み可能か
    pub fn is_writable(&self) -> bool {
        matches!(self.kind, PieceKind::Memory(_) | PieceKind::Register(_))
    }
}

/// 値のロケーション（ピースの列）
///
/// ノードと解決処理の間で `Arc<ValueLocation>` として共有されます。
/// 構築後に変更されることはありません。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueLocation {
    pieces: Vec<ValuePiece>,
}

impl ValueLocation {
    /// 空のロケーションを作成する
    pub fn new() -> Self {
        Self { pieces: Vec::new() }
    }

    /// ピース列からロケーションを作成する
    pub fn from_pieces(pieces: Vec<ValuePiece>) -> Self {
        Self { pieces }
    }

    /// 単一のメモリピースからロケーションを作成する
    pub fn from_memory(address: u64, byte_size: u64) -> Self {
        Self {
            pieces: vec![ValuePiece::memory(address, byte_size)],
        }
    }

    /// 単一のレジスタピースからロケーションを作成する
    pub fn from_register(index: u16, byte_size: u64) -> Self {
        Self {
            pieces: vec![ValuePiece::register(index, byte_size)],
        }
    }

    /// ピース数を取得する
    pub fn count_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// 指定位置のピースを取得する
    pub fn piece_at(&self, index: usize) -> Option<&ValuePiece> {
        self.pieces.get(index)
    }

    /// ピース列を取得する
    pub fn pieces(&self) -> &[ValuePiece] {
        &self.pieces
    }

    /// すべてのピースが書き込み可能か
    pub fn is_writable(&self) -> bool {
        !self.pieces.is_empty() && self.pieces.iter().all(ValuePiece::is_writable)
    }

    /// 総ビットサイズを取得する
    pub fn total_bit_size(&self) -> u64 {
        self.pieces.iter().map(|piece| piece.bit_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writability() {
        let location = ValueLocation::from_pieces(vec![
            ValuePiece::register(3, 8),
            ValuePiece::memory(0x1000, 4),
        ]);
        assert!(location.is_writable());

        let broken = ValueLocation::from_pieces(vec![
            ValuePiece::memory(0x1000, 4),
            ValuePiece {
                kind: PieceKind::Unknown,
                bit_offset: 0,
                bit_size: 32,
                size: 4,
            },
        ]);
        assert!(!broken.is_writable());

        assert!(!ValueLocation::new().is_writable());
    }

    #[test]
    fn test_total_bit_size() {
        let location = ValueLocation::from_pieces(vec![
            ValuePiece::memory(0x1000, 4),
            ValuePiece::memory(0x2000, 4),
        ]);
        assert_eq!(location.total_bit_size(), 64);
    }
}
