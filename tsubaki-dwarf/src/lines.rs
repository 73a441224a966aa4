//! ソース行情報

use crate::loader::{DwarfLoader, DwarfSlice};
use crate::Result;

/// ソース行情報
#[derive(Debug, Clone)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

/// ソース行情報の取得
///
/// addr2line のコンテキストを保持して、静的アドレス（ロードバイアス
/// 適用前）からソース上の位置を検索します。
pub struct LineInfoProvider {
    context: addr2line::Context<DwarfSlice>,
}

impl LineInfoProvider {
    /// ソース行情報プロバイダを作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let dwarf = loader.load_dwarf()?;
        let context = addr2line::Context::from_dwarf(dwarf)
            .map_err(|e| anyhow::anyhow!("Failed to build line lookup context: {}", e))?;
        Ok(Self { context })
    }

    /// アドレスからソース行情報を取得する
    pub fn lookup(&self, addr: u64) -> Result<Option<LineInfo>> {
        let location = self
            .context
            .find_location(addr)
            .map_err(|e| anyhow::anyhow!("Line lookup failed at 0x{:x}: {}", addr, e))?;

        Ok(location.and_then(|loc| {
            let file = loc.file?.to_string();
            let line = loc.line?;
            Some(LineInfo {
                file,
                line,
                column: loc.column,
            })
        }))
    }
}
