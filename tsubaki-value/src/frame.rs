//! スタックフレームの変数記述子
//!
//! デバッグ情報プロバイダが停止中のフレームから列挙した変数の一覧です。
//! ノードマネージャはこれを元にトップレベルの子を構築します。

use crate::location::ValueLocation;
use crate::types::Type;
use std::sync::Arc;

/// フレーム内の1変数
#[derive(Debug, Clone)]
pub struct Variable {
    /// 変数名
    pub name: String,
    /// 静的な型
    pub ty: Arc<Type>,
    /// 値のロケーション
    pub location: Arc<ValueLocation>,
}

impl Variable {
    /// 変数記述子を作成する
    pub fn new(name: impl Into<String>, ty: Arc<Type>, location: Arc<ValueLocation>) -> Self {
        Self {
            name: name.into(),
            ty,
            location,
        }
    }
}

/// 停止中スレッドの1スタックフレーム
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    /// フレームの関数名（分かれば）
    pub function_name: Option<String>,
    /// フレームのプログラムカウンタ
    pub pc: u64,
    /// フレームベースアドレス（分かれば）
    pub frame_base: Option<u64>,
    /// 仮引数（宣言順）
    pub parameters: Vec<Variable>,
    /// ローカル変数（宣言順）
    pub locals: Vec<Variable>,
}
