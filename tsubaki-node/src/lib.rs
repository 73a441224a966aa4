//! Tsubaki 値ノードグラフ
//!
//! このクレートは、停止中のフレームの変数から遅延構築される型付き値ツリー
//! を提供します。ノードの器（コンテナ）、型ごとの具象ノード、型ハンドラ
//! ロスター、フレームごとのマネージャ、ワーカープールによる解決エンジン
//! を含みます。

pub mod container;
pub mod manager;
pub mod nodes;
pub mod resolver;
pub mod roster;

#[cfg(test)]
pub(crate) mod testutil;

pub use container::{
    ChildId, ChildOrigin, ContainerListener, NodeId, NodeResolution, ResolutionState,
    ResolveClaim, ValueNodeContainer,
};
pub use manager::ValueNodeManager;
pub use nodes::{CStringKind, NewChild, NodeBehavior};
pub use resolver::{ResolutionTicket, ValueResolver};
pub use roster::{TypeHandler, TypeHandlerRoster};

// 基盤クレートのエラー型をそのまま使う
pub use tsubaki_value::{Error, Result};
