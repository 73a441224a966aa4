//! 値ノードコンテナ
//!
//! 1スタックフレーム分のノードグラフを所有するアリーナです。ノードと子は
//! 安定したIDで参照され、親・子・コンテナ間のリンクはすべてIDで表現
//! されます。グラフへのすべての変更は内部の単一ロックの下で行われ、変更
//! 通知はロックを保持したままリスナーへ配送されます。リスナーは通知の中
//! から同期的にコンテナを変更してはいけません（別スレッドのキューへ
//! 移譲してください）。

use crate::nodes::{NewChild, NodeBehavior};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tracing::debug;
use tsubaki_value::{Error, Result, Type, Value, ValueLocation};

/// ノードの識別子（コンテナ内で安定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

/// 子スロットの識別子（コンテナ内で安定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildId(u64);

/// 解決の状態機械
///
/// 未解決 → 解決中 → 解決済みまたは失敗。終端状態は世代内で不変です
/// （再解決はノードの差し替えで新しい世代として行われます）。
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionState {
    /// まだ解決されていない
    Unresolved,
    /// 解決処理が進行中
    Resolving,
    /// ロケーションと値が確定した
    Resolved,
    /// この世代では解決に失敗した
    Failed(Error),
}

impl ResolutionState {
    /// 終端状態（解決済みまたは失敗）か
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolutionState::Resolved | ResolutionState::Failed(_))
    }
}

/// ノード解決の最終結果（全ウェイターが同一の値を観測する）
#[derive(Debug, Clone)]
pub struct NodeResolution {
    /// 解決されたロケーション
    pub location: Option<Arc<ValueLocation>>,
    /// 解決された値（複合型などスカラー値を持たない場合は None）
    pub value: Option<Value>,
    /// 終端ステータス
    pub status: std::result::Result<(), Error>,
}

/// 子スロットのロケーション解決方法
#[derive(Debug, Clone)]
pub enum ChildOrigin {
    /// フレーム変数（ロケーションは列挙時に確定済み）
    Variable { location: Arc<ValueLocation> },
    /// 複合型のデータメンバ（親ノードのロケーションから解決）
    DataMember { member_index: usize },
    /// 複合型の基底型
    BaseType { base_index: usize },
    /// ポインタの指す先（親ノードの「値」が必要）
    PointerTarget,
    /// 配列要素（外側の次元から順の添字パス）
    ArrayElement { index_path: Vec<i64> },
    /// 多次元配列の内部次元ノード（親のロケーションを引き継ぐ）
    ArrayDimension {
        dimension: usize,
        index_prefix: Vec<i64>,
    },
    /// 実行時に計算された絶対アドレス
    Absolute { address: u64 },
}

/// コンテナの変更通知
///
/// すべてのコールバックはコンテナのロックを保持したまま呼び出されます。
pub trait ContainerListener: Send + Sync {
    /// 子の配下のノードが差し替えられた（型キャスト等）
    fn value_node_changed(&self, _child: ChildId) {}

    /// ノードに子が作成された
    fn value_node_children_created(&self, _node: NodeId, _children: &[ChildId]) {}

    /// ノードの子が削除された
    fn value_node_children_deleted(&self, _node: NodeId) {}

    /// ノードの値が確定した（成功・失敗とも）
    fn value_node_value_changed(&self, _node: NodeId) {}
}

/// 解決権の獲得結果
pub enum ResolveClaim {
    /// すでに終端状態（結果をそのまま返す）
    Done(NodeResolution),
    /// 他の解決が進行中（受信側で待つ）
    Pending(Receiver<NodeResolution>),
    /// 呼び出し側が解決を実行する（実行後に publish すること）
    Claimed {
        receiver: Receiver<NodeResolution>,
        generation: u64,
    },
}

/// 子スロットのスナップショット
#[derive(Debug, Clone)]
pub struct ChildSnapshot {
    pub name: String,
    pub ty: Arc<Type>,
    pub parent: Option<NodeId>,
    pub node: Option<NodeId>,
    pub origin: ChildOrigin,
    pub location: Option<Arc<ValueLocation>>,
    pub state: ResolutionState,
    pub hidden: bool,
}

/// ノードのスナップショット
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub ty: Arc<Type>,
    pub behavior: NodeBehavior,
    pub owner: ChildId,
    pub owner_name: String,
    pub location: Option<Arc<ValueLocation>>,
    pub value: Option<Value>,
    pub state: ResolutionState,
    pub children_created: bool,
}

struct ChildSlot {
    name: String,
    ty: Arc<Type>,
    parent: Option<NodeId>,
    node: Option<NodeId>,
    origin: ChildOrigin,
    location: Option<Arc<ValueLocation>>,
    state: ResolutionState,
    hidden: bool,
}

struct NodeSlot {
    ty: Arc<Type>,
    behavior: NodeBehavior,
    owner: ChildId,
    location: Option<Arc<ValueLocation>>,
    value: Option<Value>,
    state: ResolutionState,
    children: Vec<ChildId>,
    children_created: bool,
    waiters: Vec<Sender<NodeResolution>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    children: HashMap<u64, ChildSlot>,
    nodes: HashMap<u64, NodeSlot>,
    roots: Vec<ChildId>,
    listeners: Vec<Arc<dyn ContainerListener>>,
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// ノードとその配下の子・ノードを再帰的に取り除く
    fn remove_node_recursive(&mut self, node: NodeId) {
        if let Some(slot) = self.nodes.remove(&node.0) {
            // ウェイターの送信側はここで破棄される（受信側はキャンセルを観測）
            drop(slot.waiters);
            for child in slot.children {
                if let Some(child_slot) = self.children.remove(&child.0) {
                    if let Some(child_node) = child_slot.node {
                        self.remove_node_recursive(child_node);
                    }
                }
            }
        }
    }
}

/// 値ノードコンテナ
///
/// 単一のミューテックスがグラフ全体を保護し、世代カウンタがフレーム切り
/// 替え時のキャンセルを担います。進行中の解決ジョブは獲得時の世代を保持
/// し、公開時に世代が一致しない場合は結果を破棄します。
pub struct ValueNodeContainer {
    inner: Mutex<Inner>,
    generation: AtomicU64,
}

impl Default for ValueNodeContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueNodeContainer {
    /// 空のコンテナを作成する
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// 現在の世代を取得する
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// リスナーを登録する
    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.push(listener);
    }

    /// リスナーを取り外す（同一のArcを指すもの）
    pub fn remove_listener(&self, listener: &Arc<dyn ContainerListener>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// トップレベルの子（フレーム変数）を追加する
    ///
    /// 変数のロケーションは列挙時に確定しているため、子のロケーション
    /// 状態は最初から解決済みになります。
    pub fn add_root_child(
        &self,
        name: impl Into<String>,
        ty: Arc<Type>,
        location: Arc<ValueLocation>,
    ) -> ChildId {
        let mut inner = self.inner.lock().unwrap();
        let id = ChildId(inner.allocate_id());
        inner.children.insert(
            id.0,
            ChildSlot {
                name: name.into(),
                ty,
                parent: None,
                node: None,
                origin: ChildOrigin::Variable {
                    location: Arc::clone(&location),
                },
                location: Some(location),
                state: ResolutionState::Resolved,
                hidden: false,
            },
        );
        inner.roots.push(id);
        id
    }

    /// トップレベルの子の一覧を取得する
    pub fn root_children(&self) -> Vec<ChildId> {
        self.inner.lock().unwrap().roots.clone()
    }

    /// 名前でトップレベルの子を検索する
    pub fn find_root_child(&self, name: &str) -> Option<ChildId> {
        let inner = self.inner.lock().unwrap();
        inner
            .roots
            .iter()
            .copied()
            .find(|id| inner.children.get(&id.0).map(|c| c.name.as_str()) == Some(name))
    }

    /// すべての子を取り除き、世代を進める
    ///
    /// 進行中の解決ジョブは世代不一致により結果を破棄します。削除通知は
    /// 子を持っていた各ノードについて配送されます。
    pub fn remove_all_children(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.generation.fetch_add(1, Ordering::SeqCst);

        let emptied: Vec<NodeId> = inner
            .nodes
            .iter()
            .filter(|(_, slot)| slot.children_created)
            .map(|(id, _)| NodeId(*id))
            .collect();

        inner.children.clear();
        inner.nodes.clear();
        inner.roots.clear();

        let listeners = inner.listeners.clone();
        for node in emptied {
            for listener in &listeners {
                listener.value_node_children_deleted(node);
            }
        }
    }

    /// 子のスナップショットを取得する
    pub fn child_snapshot(&self, child: ChildId) -> Option<ChildSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.children.get(&child.0).map(|slot| ChildSnapshot {
            name: slot.name.clone(),
            ty: Arc::clone(&slot.ty),
            parent: slot.parent,
            node: slot.node,
            origin: slot.origin.clone(),
            location: slot.location.clone(),
            state: slot.state.clone(),
            hidden: slot.hidden,
        })
    }

    /// ノードのスナップショットを取得する
    pub fn node_snapshot(&self, node: NodeId) -> Option<NodeSnapshot> {
        let inner = self.inner.lock().unwrap();
        let slot = inner.nodes.get(&node.0)?;
        let owner_name = inner
            .children
            .get(&slot.owner.0)
            .map(|child| child.name.clone())
            .unwrap_or_default();
        Some(NodeSnapshot {
            ty: Arc::clone(&slot.ty),
            behavior: slot.behavior.clone(),
            owner: slot.owner,
            owner_name,
            location: slot.location.clone(),
            value: slot.value.clone(),
            state: slot.state.clone(),
            children_created: slot.children_created,
        })
    }

    /// ノードの子ID一覧を取得する
    pub fn node_children(&self, node: NodeId) -> Vec<ChildId> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&node.0)
            .map(|slot| slot.children.clone())
            .unwrap_or_default()
    }

    /// UIに見せる子のみ（内部次元ノードを除く）を取得する
    pub fn visible_node_children(&self, node: NodeId) -> Vec<ChildId> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&node.0)
            .map(|slot| {
                slot.children
                    .iter()
                    .copied()
                    .filter(|child| {
                        inner
                            .children
                            .get(&child.0)
                            .map(|c| !c.hidden)
                            .unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 子にノードを設定する（既存ノードは配下ごと破棄される＝新しい世代）
    pub fn set_child_node(
        &self,
        child: ChildId,
        ty: Arc<Type>,
        behavior: NodeBehavior,
    ) -> Result<NodeId> {
        let mut inner = self.inner.lock().unwrap();

        let old_node = match inner.children.get(&child.0) {
            Some(slot) => slot.node,
            None => return Err(Error::Cancelled),
        };
        if let Some(old) = old_node {
            inner.remove_node_recursive(old);
        }

        let id = NodeId(inner.allocate_id());
        inner.nodes.insert(
            id.0,
            NodeSlot {
                ty,
                behavior,
                owner: child,
                location: None,
                value: None,
                state: ResolutionState::Unresolved,
                children: Vec::new(),
                children_created: false,
                waiters: Vec::new(),
            },
        );
        if let Some(slot) = inner.children.get_mut(&child.0) {
            slot.node = Some(id);
        }

        let listeners = inner.listeners.clone();
        for listener in &listeners {
            listener.value_node_changed(child);
        }
        Ok(id)
    }

    /// 子のロケーション解決結果を記録する
    pub fn set_child_location(
        &self,
        child: ChildId,
        result: Result<Arc<ValueLocation>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.children.get_mut(&child.0).ok_or(Error::Cancelled)?;
        match result {
            Ok(location) => {
                slot.location = Some(location);
                slot.state = ResolutionState::Resolved;
            }
            Err(err) => {
                slot.location = None;
                slot.state = ResolutionState::Failed(err);
            }
        }
        Ok(())
    }

    /// ノード解決の実行権を獲得する
    ///
    /// 終端状態なら既存の結果を返し、解決中なら待機用の受信側を返します。
    /// 未解決の場合のみ呼び出し側が解決処理の実行責任を負います。いずれの
    /// 場合も、1ノード・1世代につき解決の試行は高々1回です。
    pub fn claim_node_resolution(&self, node: NodeId) -> Result<ResolveClaim> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.nodes.get_mut(&node.0).ok_or(Error::Cancelled)?;

        match &slot.state {
            ResolutionState::Resolved | ResolutionState::Failed(_) => {
                Ok(ResolveClaim::Done(Self::resolution_of(slot)))
            }
            ResolutionState::Resolving => {
                let (tx, rx) = mpsc::channel();
                slot.waiters.push(tx);
                Ok(ResolveClaim::Pending(rx))
            }
            ResolutionState::Unresolved => {
                slot.state = ResolutionState::Resolving;
                let (tx, rx) = mpsc::channel();
                slot.waiters.push(tx);
                Ok(ResolveClaim::Claimed {
                    receiver: rx,
                    generation: self.generation.load(Ordering::SeqCst),
                })
            }
        }
    }

    /// ノード解決の結果を公開する
    ///
    /// 獲得時の世代が現在と一致しない場合、結果は破棄されます（フレーム
    /// 切り替えによるキャンセル）。すべてのウェイターへ同一の結果が配送
    /// され、値変更通知が発火します。
    pub fn publish_node_resolution(
        &self,
        node: NodeId,
        generation: u64,
        resolution: NodeResolution,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if generation != self.generation.load(Ordering::SeqCst) {
            debug!("dropping stale resolution for node {:?}", node);
            return;
        }
        let slot = match inner.nodes.get_mut(&node.0) {
            Some(slot) => slot,
            None => return,
        };
        if slot.state.is_terminal() {
            return;
        }

        slot.location = resolution.location.clone();
        slot.value = resolution.value.clone();
        slot.state = match &resolution.status {
            Ok(()) => ResolutionState::Resolved,
            Err(err) => ResolutionState::Failed(err.clone()),
        };

        for waiter in slot.waiters.drain(..) {
            let _ = waiter.send(resolution.clone());
        }

        let listeners = inner.listeners.clone();
        for listener in &listeners {
            listener.value_node_value_changed(node);
        }
    }

    /// ノードの終端の解決結果を取得する（未終端なら None）
    pub fn node_resolution(&self, node: NodeId) -> Option<NodeResolution> {
        let inner = self.inner.lock().unwrap();
        let slot = inner.nodes.get(&node.0)?;
        if slot.state.is_terminal() {
            Some(Self::resolution_of(slot))
        } else {
            None
        }
    }

    /// 子作成の結果をコミットする
    ///
    /// 冪等です: すでに子が作成済みで追加分が空の場合、通知なしで既存の
    /// 子を返します。配列の再ウィンドウ化では作成済み添字を除いた追加分
    /// のみが作成され、バッチごとに1回の作成通知が発火します。
    pub fn commit_node_children(
        &self,
        node: NodeId,
        new_children: Vec<NewChild>,
    ) -> Result<Vec<ChildId>> {
        let mut inner = self.inner.lock().unwrap();

        // 追加対象の選別（配列は作成済み添字を除外する）
        let slot = inner.nodes.get(&node.0).ok_or(Error::Cancelled)?;
        let accepted: Vec<NewChild> = match &slot.behavior {
            NodeBehavior::Array { created, .. } => new_children
                .into_iter()
                .filter(|child| {
                    child
                        .element_index
                        .map(|index| !created.contains(&index))
                        .unwrap_or(true)
                })
                .collect(),
            _ => {
                if slot.children_created {
                    return Ok(slot.children.clone());
                }
                new_children
            }
        };

        let parent = NodeId(node.0);
        let mut added = Vec::with_capacity(accepted.len());
        for child in accepted {
            let id = ChildId(inner.allocate_id());
            inner.children.insert(
                id.0,
                ChildSlot {
                    name: child.name,
                    ty: child.ty,
                    parent: Some(parent),
                    node: None,
                    origin: child.origin,
                    location: None,
                    state: ResolutionState::Unresolved,
                    hidden: child.hidden,
                },
            );
            if let Some(index) = child.element_index {
                if let Some(slot) = inner.nodes.get_mut(&node.0) {
                    if let NodeBehavior::Array { created, .. } = &mut slot.behavior {
                        created.insert(index);
                    }
                }
            }
            if let Some(slot) = inner.nodes.get_mut(&node.0) {
                slot.children.push(id);
            }
            added.push(id);
        }

        if let Some(slot) = inner.nodes.get_mut(&node.0) {
            slot.children_created = true;
        }

        if !added.is_empty() {
            let listeners = inner.listeners.clone();
            for listener in &listeners {
                listener.value_node_children_created(node, &added);
            }
        }
        Ok(added)
    }

    /// ノードの子をすべて破棄する（再ウィンドウ化用）
    ///
    /// 削除通知を発火してから子を取り除きます。
    pub fn clear_node_children(&self, node: NodeId) {
        let mut inner = self.inner.lock().unwrap();
        let children = match inner.nodes.get(&node.0) {
            Some(slot) if slot.children_created => slot.children.clone(),
            _ => return,
        };

        let listeners = inner.listeners.clone();
        for listener in &listeners {
            listener.value_node_children_deleted(node);
        }

        for child in children {
            if let Some(slot) = inner.children.remove(&child.0) {
                if let Some(child_node) = slot.node {
                    inner.remove_node_recursive(child_node);
                }
            }
        }
        if let Some(slot) = inner.nodes.get_mut(&node.0) {
            slot.children.clear();
            slot.children_created = false;
            if let NodeBehavior::Array { created, .. } = &mut slot.behavior {
                created.clear();
            }
        }
    }

    fn resolution_of(slot: &NodeSlot) -> NodeResolution {
        NodeResolution {
            location: slot.location.clone(),
            value: slot.value.clone(),
            status: match &slot.state {
                ResolutionState::Resolved => Ok(()),
                ResolutionState::Failed(err) => Err(err.clone()),
                // 呼び出し元が終端状態を確認済み
                _ => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tsubaki_value::{TypeVariant, ValueType};

    fn int32() -> Arc<Type> {
        Arc::new(Type::new(
            1,
            "int32",
            4,
            TypeVariant::Primitive {
                value_type: ValueType::Int32,
            },
        ))
    }

    #[derive(Default)]
    struct CountingListener {
        changed: AtomicUsize,
        created: AtomicUsize,
        deleted: AtomicUsize,
        value_changed: AtomicUsize,
    }

    impl ContainerListener for CountingListener {
        fn value_node_changed(&self, _child: ChildId) {
            self.changed.fetch_add(1, Ordering::SeqCst);
        }
        fn value_node_children_created(&self, _node: NodeId, _children: &[ChildId]) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
        fn value_node_children_deleted(&self, _node: NodeId) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
        fn value_node_value_changed(&self, _node: NodeId) {
            self.value_changed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_root_child_has_resolved_location() {
        let container = ValueNodeContainer::new();
        let location = Arc::new(ValueLocation::from_memory(0x1000, 4));
        let child = container.add_root_child("x", int32(), location);

        let snapshot = container.child_snapshot(child).unwrap();
        assert_eq!(snapshot.state, ResolutionState::Resolved);
        assert!(snapshot.location.is_some());
        assert!(snapshot.node.is_none());
    }

    #[test]
    fn test_set_child_node_notifies() {
        let container = ValueNodeContainer::new();
        let listener = Arc::new(CountingListener::default());
        container.add_listener(Arc::clone(&listener) as Arc<dyn ContainerListener>);

        let location = Arc::new(ValueLocation::from_memory(0x1000, 4));
        let child = container.add_root_child("x", int32(), location);
        container
            .set_child_node(
                child,
                int32(),
                NodeBehavior::Primitive {
                    value_type: ValueType::Int32,
                },
            )
            .unwrap();
        assert_eq!(listener.changed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_claim_is_at_most_once() {
        let container = ValueNodeContainer::new();
        let location = Arc::new(ValueLocation::from_memory(0x1000, 4));
        let child = container.add_root_child("x", int32(), location);
        let node = container
            .set_child_node(
                child,
                int32(),
                NodeBehavior::Primitive {
                    value_type: ValueType::Int32,
                },
            )
            .unwrap();

        // 最初の獲得は Claimed
        let first = container.claim_node_resolution(node).unwrap();
        let generation = match &first {
            ResolveClaim::Claimed { generation, .. } => *generation,
            _ => panic!("expected Claimed"),
        };

        // 2回目は Pending
        assert!(matches!(
            container.claim_node_resolution(node).unwrap(),
            ResolveClaim::Pending(_)
        ));

        // 公開後は Done
        container.publish_node_resolution(
            node,
            generation,
            NodeResolution {
                location: None,
                value: Some(Value::Int32(7)),
                status: Ok(()),
            },
        );
        match container.claim_node_resolution(node).unwrap() {
            ResolveClaim::Done(resolution) => {
                assert_eq!(resolution.value, Some(Value::Int32(7)));
            }
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let container = ValueNodeContainer::new();
        let location = Arc::new(ValueLocation::from_memory(0x1000, 4));
        let child = container.add_root_child("x", int32(), location);
        let node = container
            .set_child_node(
                child,
                int32(),
                NodeBehavior::Primitive {
                    value_type: ValueType::Int32,
                },
            )
            .unwrap();

        let generation = match container.claim_node_resolution(node).unwrap() {
            ResolveClaim::Claimed { generation, .. } => generation,
            _ => panic!("expected Claimed"),
        };

        // フレーム切り替え相当
        container.remove_all_children();

        // 古い世代の公開は無視される（ノード自体も消えている）
        container.publish_node_resolution(
            node,
            generation,
            NodeResolution {
                location: None,
                value: Some(Value::Int32(1)),
                status: Ok(()),
            },
        );
        assert!(container.node_resolution(node).is_none());
        assert!(container.generation() > 0);
    }

    #[test]
    fn test_commit_children_idempotent() {
        let container = ValueNodeContainer::new();
        let listener = Arc::new(CountingListener::default());
        container.add_listener(Arc::clone(&listener) as Arc<dyn ContainerListener>);

        let location = Arc::new(ValueLocation::from_memory(0x1000, 4));
        let child = container.add_root_child("x", int32(), location);
        let node = container
            .set_child_node(child, int32(), NodeBehavior::Compound)
            .unwrap();

        let first = container
            .commit_node_children(
                node,
                vec![NewChild {
                    name: "m".to_string(),
                    ty: int32(),
                    origin: ChildOrigin::DataMember { member_index: 0 },
                    hidden: false,
                    element_index: None,
                }],
            )
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(listener.created.load(Ordering::SeqCst), 1);

        // 2回目は既存の子が返り、通知は発火しない
        let second = container.commit_node_children(node, Vec::new()).unwrap();
        assert_eq!(second, first);
        assert_eq!(listener.created.load(Ordering::SeqCst), 1);
    }
}
