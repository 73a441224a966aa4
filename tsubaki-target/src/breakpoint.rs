//! ソフトウェアブレークポイント

use crate::memory::ProcessMemory;
use crate::Result;
use tracing::debug;

/// INT3命令のオペコード
const INT3_OPCODE: u8 = 0xCC;

/// ソフトウェアブレークポイント（INT3命令のパッチ）
pub struct SoftwareBreakpoint {
    address: u64,
    original_byte: u8,
    enabled: bool,
}

impl SoftwareBreakpoint {
    /// ブレークポイントを作成する（未設定の状態）
    pub fn new(address: u64) -> Self {
        Self {
            address,
            original_byte: 0,
            enabled: false,
        }
    }

    /// ブレークポイントのアドレスを取得する
    pub fn address(&self) -> u64 {
        self.address
    }

    /// ブレークポイントが有効かどうか
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 置き換える前の元のバイトを取得する
    pub fn original_byte(&self) -> u8 {
        self.original_byte
    }

    /// ブレークポイントを設定する
    ///
    /// アドレスの先頭バイトを保存してから INT3 で置き換えます。
    pub fn enable(&mut self, memory: &ProcessMemory) -> Result<()> {
        if self.enabled {
            return Ok(());
        }

        self.original_byte = memory.read_u8(self.address)?;
        memory.write_u8(self.address, INT3_OPCODE)?;
        debug!("breakpoint enabled at 0x{:x}", self.address);

        self.enabled = true;
        Ok(())
    }

    /// ブレークポイントを解除する
    pub fn disable(&mut self, memory: &ProcessMemory) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        memory.write_u8(self.address, self.original_byte)?;
        debug!("breakpoint disabled at 0x{:x}", self.address);

        self.enabled = false;
        Ok(())
    }
}
