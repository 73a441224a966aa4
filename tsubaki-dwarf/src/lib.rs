//! Tsubaki DWARF デバッグ情報プロバイダ
//!
//! ELFファイルとDWARFデバッグ情報を解析して、値解決エンジンへの入力を
//! 生成します。シンボル解決、アドレスからソース行への変換、型DIEから
//! 型記述子（`tsubaki_value::Type`）の構築、停止中フレームの変数列挙と
//! ロケーション式の評価を行います。`TypeInformation` コレボレータは
//! `TypeCatalog` が実装します。

pub mod lines;
pub mod loader;
pub mod loc_eval;
pub mod symbols;
pub mod types;
pub mod variables;

pub use lines::{LineInfo, LineInfoProvider};
pub use loader::{DwarfLoader, DwarfSlice};
pub use loc_eval::LocationEvaluator;
pub use symbols::{Symbol, SymbolResolver};
pub use types::{TypeBuilder, TypeCatalog};
pub use variables::FrameVariableLocator;

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
