//! Tsubaki ターゲットプロセス制御
//!
//! デバッグ対象プロセスを制御する低レベル機能です。ptrace によるプロセス
//! 制御、停止中スレッドのレジスタアクセス、/proc 経由のメモリアクセス、
//! ソフトウェアブレークポイントを提供します。値解決エンジンのコレボレータ
//! トレイト（`TargetMemory` / `CpuState` / `Architecture`）はこのクレート
//! の型が実装します。

pub mod breakpoint;
pub mod memory;
pub mod process;
pub mod registers;

pub use breakpoint::SoftwareBreakpoint;
pub use memory::{MemoryMapping, ProcessMemory};
pub use process::{Process, StopReason};
pub use registers::{Amd64, Registers, StoppedCpuState};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
