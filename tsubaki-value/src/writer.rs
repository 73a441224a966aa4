//! 値ライター
//!
//! デコード済みの値をロケーションのピース列へ書き戻します。ローダーの
//! 逆操作で、ビッグエンディアンのバイト像をピース順に分割し、各ピースを
//! ターゲットのエンディアンへ戻してから書き込みます。

use crate::location::{PieceKind, ValueLocation};
use crate::traits::{Architecture, CpuState, TargetMemory};
use crate::value::Value;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// 値ライター
#[derive(Clone)]
pub struct ValueWriter {
    architecture: Arc<dyn Architecture>,
    memory: Arc<dyn TargetMemory>,
    cpu_state: Arc<dyn CpuState>,
}

impl ValueWriter {
    /// 新しいライターを作成する
    pub fn new(
        architecture: Arc<dyn Architecture>,
        memory: Arc<dyn TargetMemory>,
        cpu_state: Arc<dyn CpuState>,
    ) -> Self {
        Self {
            architecture,
            memory,
            cpu_state,
        }
    }

    /// 値をロケーションへ書き戻す
    ///
    /// ビットフィールド（バイト境界に揃っていないピース）への書き戻しは
    /// 未対応です。
    pub fn write_value(&self, location: &ValueLocation, value: &Value) -> Result<()> {
        if !location.is_writable() {
            return Err(Error::Unsupported);
        }

        let image = value.to_be_bytes().ok_or(Error::Unsupported)?;

        // バイト境界に揃ったピースのみ対応する
        let mut total_size: u64 = 0;
        for piece in location.pieces() {
            if piece.bit_offset != 0 || piece.bit_size != piece.size * 8 {
                return Err(Error::Unsupported);
            }
            total_size += piece.size;
        }
        if total_size == 0 {
            return Err(Error::EntryNotFound);
        }

        // 値のバイト像をピース列の総サイズに合わせる（左詰めゼロ埋め、
        // 長すぎる場合は上位バイトを切り詰める）
        let mut padded = vec![0u8; total_size as usize];
        if image.len() >= padded.len() {
            let start = image.len() - padded.len();
            padded.copy_from_slice(&image[start..]);
        } else {
            let start = padded.len() - image.len();
            padded[start..].copy_from_slice(&image);
        }

        // ピース順（ビッグエンディアン順）に分割して書き込む
        let mut cursor = 0usize;
        for piece in location.pieces() {
            let size = piece.size as usize;
            let mut bytes = padded[cursor..cursor + size].to_vec();
            cursor += size;

            match piece.kind {
                PieceKind::Memory(address) => {
                    if !self.architecture.is_big_endian() {
                        bytes.reverse();
                    }
                    self.memory.write_memory(address, &bytes)?;
                    debug!("wrote {} byte memory piece at 0x{:x}", size, address);
                }
                PieceKind::Register(index) => {
                    if size > 8 {
                        return Err(Error::Unsupported);
                    }
                    let register = self
                        .architecture
                        .register_by_index(index)
                        .ok_or(Error::EntryNotFound)?;
                    let mut image = [0u8; 8];
                    image[8 - size..].copy_from_slice(&bytes);
                    let new_value = u64::from_be_bytes(image);
                    self.cpu_state.set_register_value(register, new_value)?;
                    debug!("wrote register piece to {}", register.name);
                }
                PieceKind::Invalid | PieceKind::Unknown => return Err(Error::Unsupported),
            }
        }

        Ok(())
    }
}
