//! ブレークポイント管理

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tsubaki_target::{ProcessMemory, SoftwareBreakpoint};

/// ブレークポイントID
pub type BreakpointId = usize;

/// 登録済みブレークポイント
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub address: u64,
    pub enabled: bool,
}

/// ブレークポイントの登録と有効・無効を管理する
pub struct BreakpointManager {
    breakpoints: HashMap<BreakpointId, (Breakpoint, SoftwareBreakpoint)>,
    next_id: BreakpointId,
}

impl BreakpointManager {
    /// 空のマネージャを作成する
    pub fn new() -> Self {
        Self {
            breakpoints: HashMap::new(),
            next_id: 1,
        }
    }

    /// ブレークポイントを追加してターゲットに書き込む
    pub fn add_and_enable(
        &mut self,
        address: u64,
        memory: &ProcessMemory,
    ) -> Result<BreakpointId> {
        let mut software = SoftwareBreakpoint::new(address);
        software.enable(memory)?;

        let id = self.next_id;
        self.next_id += 1;
        let breakpoint = Breakpoint {
            id,
            address,
            enabled: true,
        };
        self.breakpoints.insert(id, (breakpoint, software));
        Ok(id)
    }

    /// ブレークポイントを外して登録を削除する
    pub fn remove_and_disable(&mut self, id: BreakpointId, memory: &ProcessMemory) -> Result<()> {
        let (_, mut software) = self
            .breakpoints
            .remove(&id)
            .ok_or_else(|| anyhow!("no breakpoint with id {}", id))?;
        if software.is_enabled() {
            software.disable(memory)?;
        }
        Ok(())
    }

    /// INT3 を一時的に外す（元の命令でステップするため）
    pub fn disable(&mut self, id: BreakpointId, memory: &ProcessMemory) -> Result<()> {
        let (breakpoint, software) = self
            .breakpoints
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no breakpoint with id {}", id))?;
        software.disable(memory)?;
        breakpoint.enabled = false;
        Ok(())
    }

    /// INT3 を書き戻す
    pub fn enable(&mut self, id: BreakpointId, memory: &ProcessMemory) -> Result<()> {
        let (breakpoint, software) = self
            .breakpoints
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no breakpoint with id {}", id))?;
        software.enable(memory)?;
        breakpoint.enabled = true;
        Ok(())
    }

    /// 実行時アドレスからブレークポイントを検索する
    pub fn find_by_address(&self, address: u64) -> Option<BreakpointId> {
        self.breakpoints
            .values()
            .find(|(breakpoint, _)| breakpoint.address == address)
            .map(|(breakpoint, _)| breakpoint.id)
    }

    /// ブレークポイントを取得する
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id).map(|(breakpoint, _)| breakpoint)
    }

    /// すべてのブレークポイントをID順で取得する
    pub fn all(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self
            .breakpoints
            .values()
            .map(|(breakpoint, _)| breakpoint.clone())
            .collect();
        all.sort_by_key(|breakpoint| breakpoint.id);
        all
    }

    /// 登録数を取得する
    pub fn count(&self) -> usize {
        self.breakpoints.len()
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}
