//! レジスタアクセス
//!
//! ptrace で停止中プロセスのレジスタを読み書きします。DWARFレジスタ番号
//! （System V AMD64 ABI）と `user_regs_struct` のフィールドの対応もここで
//! 持ち、値解決エンジンの `CpuState` / `Architecture` コレボレータを実装
//! します。

use crate::Result;
use nix::libc::user_regs_struct;
use nix::unistd::Pid;
use std::sync::Mutex;
use tsubaki_value::{Architecture, CpuState, Register};

/// DWARFレジスタ番号順の汎用レジスタ表（System V AMD64 ABI）
const AMD64_REGISTERS: [Register; 17] = [
    Register { index: 0, name: "rax", byte_size: 8 },
    Register { index: 1, name: "rdx", byte_size: 8 },
    Register { index: 2, name: "rcx", byte_size: 8 },
    Register { index: 3, name: "rbx", byte_size: 8 },
    Register { index: 4, name: "rsi", byte_size: 8 },
    Register { index: 5, name: "rdi", byte_size: 8 },
    Register { index: 6, name: "rbp", byte_size: 8 },
    Register { index: 7, name: "rsp", byte_size: 8 },
    Register { index: 8, name: "r8", byte_size: 8 },
    Register { index: 9, name: "r9", byte_size: 8 },
    Register { index: 10, name: "r10", byte_size: 8 },
    Register { index: 11, name: "r11", byte_size: 8 },
    Register { index: 12, name: "r12", byte_size: 8 },
    Register { index: 13, name: "r13", byte_size: 8 },
    Register { index: 14, name: "r14", byte_size: 8 },
    Register { index: 15, name: "r15", byte_size: 8 },
    Register { index: 16, name: "rip", byte_size: 8 },
];

/// DWARFレジスタ番号からレジスタ値を取り出す
fn register_value_of(regs: &user_regs_struct, index: u16) -> Option<u64> {
    let value = match index {
        0 => regs.rax,
        1 => regs.rdx,
        2 => regs.rcx,
        3 => regs.rbx,
        4 => regs.rsi,
        5 => regs.rdi,
        6 => regs.rbp,
        7 => regs.rsp,
        8 => regs.r8,
        9 => regs.r9,
        10 => regs.r10,
        11 => regs.r11,
        12 => regs.r12,
        13 => regs.r13,
        14 => regs.r14,
        15 => regs.r15,
        16 => regs.rip,
        _ => return None,
    };
    Some(value)
}

/// DWARFレジスタ番号でレジスタ値を設定する
fn set_register_value_of(regs: &mut user_regs_struct, index: u16, value: u64) -> bool {
    match index {
        0 => regs.rax = value,
        1 => regs.rdx = value,
        2 => regs.rcx = value,
        3 => regs.rbx = value,
        4 => regs.rsi = value,
        5 => regs.rdi = value,
        6 => regs.rbp = value,
        7 => regs.rsp = value,
        8 => regs.r8 = value,
        9 => regs.r9 = value,
        10 => regs.r10 = value,
        11 => regs.r11 = value,
        12 => regs.r12 = value,
        13 => regs.r13 = value,
        14 => regs.r14 = value,
        15 => regs.r15 = value,
        16 => regs.rip = value,
        _ => return false,
    }
    true
}

/// x86-64 のアーキテクチャ記述
pub struct Amd64;

impl Architecture for Amd64 {
    fn address_size(&self) -> u64 {
        8
    }

    fn is_big_endian(&self) -> bool {
        false
    }

    fn registers(&self) -> &[Register] {
        &AMD64_REGISTERS
    }
}

/// 生のレジスタアクセス
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> Result<user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// レジスタに書き込む
    pub fn write(&self, regs: user_regs_struct) -> Result<()> {
        nix::sys::ptrace::setregs(self.pid, regs)?;
        Ok(())
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn pc(&self) -> Result<u64> {
        Ok(self.read()?.rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        let mut regs = self.read()?;
        regs.rip = pc;
        self.write(regs)
    }

    /// 停止時点のCPU状態スナップショットを取る
    pub fn snapshot(&self) -> Result<StoppedCpuState> {
        Ok(StoppedCpuState {
            pid: self.pid,
            regs: Mutex::new(self.read()?),
        })
    }
}

/// 停止中スレッドのCPU状態
///
/// 停止時点のレジスタ像を保持し、書き戻しは ptrace でターゲットにも反映
/// します。プロセスを再開したらスナップショットは取り直してください。
pub struct StoppedCpuState {
    pid: Pid,
    regs: Mutex<user_regs_struct>,
}

impl CpuState for StoppedCpuState {
    fn register_value(&self, register: &Register) -> Option<u64> {
        let regs = self.regs.lock().unwrap();
        register_value_of(&regs, register.index)
    }

    fn set_register_value(&self, register: &Register, value: u64) -> tsubaki_value::Result<()> {
        let mut regs = self.regs.lock().unwrap();
        if !set_register_value_of(&mut regs, register.index, value) {
            return Err(tsubaki_value::Error::EntryNotFound);
        }
        nix::sys::ptrace::setregs(self.pid, *regs).map_err(tsubaki_value::Error::io)
    }

    fn stack_pointer(&self) -> u64 {
        self.regs.lock().unwrap().rsp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 全フィールドが0のレジスタ像
    fn zeroed_regs() -> user_regs_struct {
        user_regs_struct {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rax: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            orig_rax: 0,
            rip: 0,
            cs: 0,
            eflags: 0,
            rsp: 0,
            ss: 0,
            fs_base: 0,
            gs_base: 0,
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
        }
    }

    #[test]
    fn test_dwarf_register_mapping_round_trip() {
        let mut regs = zeroed_regs();
        for register in &AMD64_REGISTERS {
            assert!(set_register_value_of(
                &mut regs,
                register.index,
                register.index as u64 + 1
            ));
        }
        for register in &AMD64_REGISTERS {
            assert_eq!(
                register_value_of(&regs, register.index),
                Some(register.index as u64 + 1)
            );
        }
        assert_eq!(register_value_of(&regs, 99), None);
    }

    #[test]
    fn test_architecture_register_lookup() {
        let arch = Amd64;
        assert_eq!(arch.address_size(), 8);
        assert!(!arch.is_big_endian());
        assert_eq!(arch.register_by_index(6).unwrap().name, "rbp");
        assert!(arch.register_by_index(99).is_none());
    }
}
