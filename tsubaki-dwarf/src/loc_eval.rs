//! DWARFロケーション式の評価
//!
//! gimli の `Evaluation` を駆動し、停止中フレームのレジスタとメモリを
//! コールバックで供給して、値解決エンジンの `ValueLocation` を生成します。

use crate::loader::DwarfSlice;
use crate::Result;
use tracing::debug;
use tsubaki_value::{PieceKind, ValueLocation, ValuePiece};

/// ロケーション式評価器
pub struct LocationEvaluator {
    /// PIEのロードバイアス（DW_OP_addr の静的アドレスに加算する）
    load_bias: u64,
}

impl LocationEvaluator {
    /// 新しい評価器を作成する
    pub fn new(load_bias: u64) -> Self {
        Self { load_bias }
    }

    /// ロケーション式を評価する
    ///
    /// `byte_size` は対象オブジェクトのサイズで、ピースが自身のサイズを
    /// 持たない場合（オブジェクト全体が1つの場所にある場合）に使います。
    /// `get_register` はDWARFレジスタ番号の値を、`read_memory` はターゲット
    /// メモリを供給するコールバックです。
    pub fn evaluate<F, G>(
        &self,
        expression: gimli::Expression<DwarfSlice>,
        encoding: gimli::Encoding,
        frame_base: Option<u64>,
        byte_size: u64,
        get_register: &mut F,
        read_memory: &mut G,
    ) -> Result<ValueLocation>
    where
        F: FnMut(u16) -> Result<u64>,
        G: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let mut eval = expression.evaluation(encoding);
        let mut step = eval.evaluate()?;

        loop {
            match step {
                gimli::EvaluationResult::Complete => break,
                gimli::EvaluationResult::RequiresRegister { register, .. } => {
                    let value = get_register(register.0)?;
                    step = eval.resume_with_register(gimli::Value::Generic(value))?;
                }
                gimli::EvaluationResult::RequiresFrameBase => {
                    let base = frame_base
                        .ok_or_else(|| anyhow::anyhow!("frame base required but unavailable"))?;
                    step = eval.resume_with_frame_base(base)?;
                }
                gimli::EvaluationResult::RequiresMemory { address, size, .. } => {
                    let bytes = read_memory(address, size as usize)?;
                    let mut image = [0u8; 8];
                    let len = bytes.len().min(8);
                    image[..len].copy_from_slice(&bytes[..len]);
                    step = eval
                        .resume_with_memory(gimli::Value::Generic(u64::from_le_bytes(image)))?;
                }
                gimli::EvaluationResult::RequiresRelocatedAddress(address) => {
                    // DW_OP_addr の静的アドレスを実行時アドレスへ変換する
                    step = eval.resume_with_relocated_address(address + self.load_bias)?;
                }
                other => {
                    return Err(anyhow::anyhow!(
                        "unsupported location expression step: {:?}",
                        other
                    ))
                }
            }
        }

        Ok(Self::convert_pieces(&eval.result(), byte_size))
    }

    /// gimli のピース列を `ValueLocation` へ変換する
    fn convert_pieces(pieces: &[gimli::Piece<DwarfSlice>], byte_size: u64) -> ValueLocation {
        let mut converted = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let bit_size = piece.size_in_bits.unwrap_or(byte_size * 8);
            let kind = match piece.location {
                gimli::Location::Register { register } => PieceKind::Register(register.0),
                gimli::Location::Address { address } => PieceKind::Memory(address),
                gimli::Location::Empty => PieceKind::Unknown,
                // 暗黙値やバイト列は格納先として表現できない
                ref other => {
                    debug!("unrepresentable piece location: {:?}", other);
                    PieceKind::Unknown
                }
            };
            converted.push(ValuePiece {
                kind,
                bit_offset: piece.bit_offset.unwrap_or(0),
                bit_size,
                size: bit_size.div_ceil(8),
            });
        }
        ValueLocation::from_pieces(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODING: gimli::Encoding = gimli::Encoding {
        format: gimli::Format::Dwarf32,
        version: 4,
        address_size: 8,
    };

    fn expression(bytes: &'static [u8]) -> gimli::Expression<DwarfSlice> {
        gimli::Expression(gimli::EndianSlice::new(bytes, gimli::RunTimeEndian::Little))
    }

    fn no_register(_: u16) -> Result<u64> {
        Err(anyhow::anyhow!("no registers in this test"))
    }

    fn no_memory(_: u64, _: usize) -> Result<Vec<u8>> {
        Err(anyhow::anyhow!("no memory in this test"))
    }

    #[test]
    fn test_fbreg_offset_from_frame_base() {
        // DW_OP_fbreg -8
        const EXPR: &[u8] = &[0x91, 0x78];
        let evaluator = LocationEvaluator::new(0);
        let location = evaluator
            .evaluate(
                expression(EXPR),
                ENCODING,
                Some(0x1000),
                4,
                &mut no_register,
                &mut no_memory,
            )
            .unwrap();

        let piece = location.piece_at(0).unwrap();
        assert_eq!(piece.kind, PieceKind::Memory(0xff8));
        assert_eq!(piece.size, 4);
    }

    #[test]
    fn test_register_location() {
        // DW_OP_reg5 (rdi)
        const EXPR: &[u8] = &[0x55];
        let evaluator = LocationEvaluator::new(0);
        let location = evaluator
            .evaluate(
                expression(EXPR),
                ENCODING,
                None,
                8,
                &mut no_register,
                &mut no_memory,
            )
            .unwrap();

        assert_eq!(
            location.piece_at(0).unwrap().kind,
            PieceKind::Register(5)
        );
    }

    #[test]
    fn test_static_address_gets_load_bias() {
        // DW_OP_addr 0x2000
        const EXPR: &[u8] = &[0x03, 0x00, 0x20, 0, 0, 0, 0, 0, 0];
        let evaluator = LocationEvaluator::new(0x1000);
        let location = evaluator
            .evaluate(
                expression(EXPR),
                ENCODING,
                None,
                4,
                &mut no_register,
                &mut no_memory,
            )
            .unwrap();

        assert_eq!(
            location.piece_at(0).unwrap().kind,
            PieceKind::Memory(0x3000)
        );
    }

    #[test]
    fn test_missing_frame_base_is_an_error() {
        // DW_OP_fbreg 0
        const EXPR: &[u8] = &[0x91, 0x00];
        let evaluator = LocationEvaluator::new(0);
        let result = evaluator.evaluate(
            expression(EXPR),
            ENCODING,
            None,
            4,
            &mut no_register,
            &mut no_memory,
        );
        assert!(result.is_err());
    }
}
