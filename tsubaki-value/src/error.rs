//! 値解決のエラー型

/// 値解決で発生するエラー
///
/// 構造エラー（型とロケーションの不整合）、I/Oエラー（ターゲットメモリの
/// 読み取り失敗）、リソースエラーを区別します。解決途中の状態（未解決）は
/// エラーではなく `ResolutionState` 側で表現されます。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// 引数や前提条件の不整合（親のロケーションが未解決など）
    #[error("invalid value or precondition")]
    BadValue,

    /// サポートされていない操作や形状（64bit超の値、該当ハンドラなし等）
    #[error("unsupported operation or value shape")]
    Unsupported,

    /// 必要な情報が存在しない（ピースなし、型が見つからない等）
    #[error("entry not found")]
    EntryNotFound,

    /// ターゲットメモリの不正アドレス
    #[error("bad address 0x{0:x}")]
    BadAddress(u64),

    /// ターゲット側のリソース確保失敗
    #[error("out of memory")]
    NoMemory,

    /// 下位レイヤのI/Oエラー（メッセージをそのまま保持）
    #[error("i/o error: {0}")]
    Io(String),

    /// 対象のノードグラフが破棄された（フレーム切り替え等）
    #[error("resolution cancelled")]
    Cancelled,
}

impl Error {
    /// I/Oエラーをメッセージ文字列から作成する
    pub fn io<E: std::fmt::Display>(err: E) -> Self {
        Error::Io(err.to_string())
    }
}
