//! コレボレータのトレイト
//!
//! ターゲットプロセスへの生のアクセス（メモリ、レジスタ）とデバッグ情報
//! （型の検索）を抽象化します。具体実装は tsubaki-target / tsubaki-dwarf
//! が提供し、テストではモックに差し替えます。

use crate::types::{Type, TypeLookupConstraints};
use crate::Result;
use std::sync::Arc;

/// レジスタのメタデータ
#[derive(Debug, Clone)]
pub struct Register {
    /// DWARFレジスタ番号
    pub index: u16,
    /// レジスタ名
    pub name: &'static str,
    /// バイトサイズ
    pub byte_size: u64,
}

/// ターゲットアーキテクチャの記述
pub trait Architecture: Send + Sync {
    /// ポインタのバイト幅（4または8）
    fn address_size(&self) -> u64;

    /// ビッグエンディアンか
    fn is_big_endian(&self) -> bool;

    /// レジスタの一覧（DWARF番号順とは限らない）
    fn registers(&self) -> &[Register];

    /// レジスタ数
    fn count_registers(&self) -> usize {
        self.registers().len()
    }

    /// DWARF番号からレジスタを検索する
    fn register_by_index(&self, index: u16) -> Option<&Register> {
        self.registers().iter().find(|register| register.index == index)
    }
}

/// ターゲットプロセスのメモリアクセス
pub trait TargetMemory: Send + Sync {
    /// メモリを読み取る。読み取れたバイト数を返す
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<usize>;

    /// メモリへ書き込む
    fn write_memory(&self, address: u64, data: &[u8]) -> Result<()>;

    /// NUL終端文字列を読み取る（最大 `max_length` バイト）
    ///
    /// 既定実装は1バイトずつ読み進めます。ページ境界をまたぐ読み取りが
    /// 途中で失敗しても、そこまでの内容を文字列として返します。
    fn read_memory_string(&self, address: u64, max_length: usize) -> Result<String> {
        let mut bytes = Vec::new();
        let mut buf = [0u8; 1];
        for i in 0..max_length {
            match self.read_memory(address + i as u64, &mut buf) {
                Ok(1) => {
                    if buf[0] == 0 {
                        break;
                    }
                    bytes.push(buf[0]);
                }
                Ok(_) => break,
                Err(err) => {
                    if bytes.is_empty() {
                        return Err(err);
                    }
                    break;
                }
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// 停止中スレッドのCPU状態
pub trait CpuState: Send + Sync {
    /// レジスタ値を取得する。取得できない場合は None
    fn register_value(&self, register: &Register) -> Option<u64>;

    /// レジスタ値を設定する（書き戻し用）
    fn set_register_value(&self, register: &Register, value: u64) -> Result<()>;

    /// スタックポインタを取得する
    fn stack_pointer(&self) -> u64;
}

/// デバッグ情報による型の検索
pub trait TypeInformation: Send + Sync {
    /// 名前と条件から型を検索する
    fn lookup_type_by_name(
        &self,
        name: &str,
        constraints: &TypeLookupConstraints,
    ) -> Result<Arc<Type>>;

    /// 名前と条件に一致する型が存在するか
    fn type_exists_by_name(&self, name: &str, constraints: &TypeLookupConstraints) -> bool {
        self.lookup_type_by_name(name, constraints).is_ok()
    }
}
