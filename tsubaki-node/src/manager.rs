//! 値ノードマネージャ
//!
//! コンテナを「現在のスタックフレーム」に束ねるオーケストレータです。
//! フレーム切り替えで古いコンテナを破棄して作り直し、フレーム変数ごとの
//! トップレベルの子を構築します。コンテナの識別がフレームごとに変わる
//! ため、上位層はマネージャのリスナーに登録したまま差し替えを追えます。

use crate::container::{ChildId, ContainerListener, NodeId, ValueNodeContainer};
use crate::nodes;
use crate::roster::TypeHandlerRoster;
use std::sync::{Arc, Mutex};
use tracing::debug;
use tsubaki_value::{Error, Result, StackFrame, ValueLoader, Variable};

/// コンテナのイベントをマネージャのリスナーへ転送する
struct RelayListener {
    listeners: Arc<Mutex<Vec<Arc<dyn ContainerListener>>>>,
}

impl RelayListener {
    fn each(&self, f: impl Fn(&Arc<dyn ContainerListener>)) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in &listeners {
            f(listener);
        }
    }
}

impl ContainerListener for RelayListener {
    fn value_node_changed(&self, child: ChildId) {
        self.each(|listener| listener.value_node_changed(child));
    }

    fn value_node_children_created(&self, node: NodeId, children: &[ChildId]) {
        self.each(|listener| listener.value_node_children_created(node, children));
    }

    fn value_node_children_deleted(&self, node: NodeId) {
        self.each(|listener| listener.value_node_children_deleted(node));
    }

    fn value_node_value_changed(&self, node: NodeId) {
        self.each(|listener| listener.value_node_value_changed(node));
    }
}

/// 値ノードマネージャ
pub struct ValueNodeManager {
    roster: Arc<TypeHandlerRoster>,
    container: Mutex<Option<Arc<ValueNodeContainer>>>,
    listeners: Arc<Mutex<Vec<Arc<dyn ContainerListener>>>>,
}

impl ValueNodeManager {
    /// 新しいマネージャを作成する
    pub fn new(roster: Arc<TypeHandlerRoster>) -> Self {
        Self {
            roster,
            container: Mutex::new(None),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// マネージャレベルのリスナーを登録する
    ///
    /// フレーム切り替えでコンテナが差し替わっても登録は保持されます。
    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// リスナーを取り外す
    pub fn remove_listener(&self, listener: &Arc<dyn ContainerListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// 現在のコンテナを取得する
    pub fn container(&self) -> Option<Arc<ValueNodeContainer>> {
        self.container.lock().unwrap().clone()
    }

    /// 現在のスタックフレームを設定する
    ///
    /// 古いコンテナの子をすべて破棄し（削除通知が飛ぶ）、新しいフレームの
    /// パラメータ・ローカル変数の順でトップレベルの子を構築します。各変数
    /// の第1階層の子は即座に実体化し、それより深い階層は遅延のままです。
    pub fn set_stack_frame(
        &self,
        frame: Option<&StackFrame>,
        loader: &ValueLoader,
    ) -> Result<()> {
        let old = self.container.lock().unwrap().take();
        if let Some(old) = old {
            old.remove_all_children();
        }

        let frame = match frame {
            Some(frame) => frame,
            None => return Ok(()),
        };

        let container = Arc::new(ValueNodeContainer::new());
        container.add_listener(Arc::new(RelayListener {
            listeners: Arc::clone(&self.listeners),
        }));

        debug!(
            "building container for frame {} ({} parameters, {} locals)",
            frame.function_name.as_deref().unwrap_or("?"),
            frame.parameters.len(),
            frame.locals.len()
        );

        // パラメータが先、ローカル変数が後（宣言順）
        for variable in frame.parameters.iter().chain(frame.locals.iter()) {
            let child = self.add_variable(&container, variable);
            if let Err(err) = self.add_child_nodes_in(&container, child, loader) {
                // 1変数の失敗で残りを巻き込まない
                debug!("failed to materialize variable {}: {}", variable.name, err);
            }
        }

        *self.container.lock().unwrap() = Some(container);
        Ok(())
    }

    /// 子のノードを（必要なら）作成し、第1階層の子を実体化する
    ///
    /// 冪等です。ノードが値を先に必要とするコンテナ型の場合、子の作成は
    /// ノードの解決後に呼び出し側が改めて要求します。
    pub fn add_child_nodes(&self, child: ChildId, loader: &ValueLoader) -> Result<()> {
        let container = self.container().ok_or(Error::Cancelled)?;
        self.add_child_nodes_in(&container, child, loader)
    }

    /// 配列ノードのウィンドウを明示的に広げる
    pub fn create_children_in_range(
        &self,
        node: NodeId,
        low: i64,
        high: i64,
        loader: &ValueLoader,
    ) -> Result<Vec<ChildId>> {
        let container = self.container().ok_or(Error::Cancelled)?;
        nodes::create_node_children(&container, node, Some((low, high)), loader)
    }

    /// ノードの子を破棄して作り直せるようにする
    pub fn clear_children(&self, node: NodeId) -> Result<()> {
        let container = self.container().ok_or(Error::Cancelled)?;
        container.clear_node_children(node);
        Ok(())
    }

    fn add_variable(&self, container: &Arc<ValueNodeContainer>, variable: &Variable) -> ChildId {
        container.add_root_child(
            variable.name.clone(),
            Arc::clone(&variable.ty),
            Arc::clone(&variable.location),
        )
    }

    fn add_child_nodes_in(
        &self,
        container: &Arc<ValueNodeContainer>,
        child: ChildId,
        loader: &ValueLoader,
    ) -> Result<()> {
        let snapshot = container.child_snapshot(child).ok_or(Error::Cancelled)?;

        let node = match snapshot.node {
            Some(node) => node,
            None => {
                let (ty, behavior) = self.roster.create_value_node(&snapshot.ty)?;
                container.set_child_node(child, ty, behavior)?
            }
        };

        let node_snapshot = container.node_snapshot(node).ok_or(Error::Cancelled)?;
        if node_snapshot.behavior.children_creation_needs_value()
            && !node_snapshot.state.is_terminal()
        {
            // 値を先に解決しないと子を列挙できない
            return Ok(());
        }

        nodes::create_node_children(container, node, None, loader)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ChildOrigin;
    use crate::testutil::{self, TestTarget};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tsubaki_value::ValueLocation;

    fn frame_with_point() -> StackFrame {
        StackFrame {
            function_name: Some("main".to_string()),
            pc: 0x400000,
            frame_base: Some(0x7fff_0000),
            parameters: vec![Variable::new(
                "argc",
                testutil::int32(),
                Arc::new(ValueLocation::from_memory(0x1000, 4)),
            )],
            locals: vec![Variable::new(
                "p",
                testutil::point_type(),
                Arc::new(ValueLocation::from_memory(0x1008, 8)),
            )],
        }
    }

    #[test]
    fn test_set_stack_frame_builds_roots_in_order() {
        let target = TestTarget::with_memory(0x1000, vec![0; 32]);
        let manager = ValueNodeManager::new(Arc::new(TypeHandlerRoster::with_default_handlers()));
        manager
            .set_stack_frame(Some(&frame_with_point()), &target.loader)
            .unwrap();

        let container = manager.container().unwrap();
        let roots = container.root_children();
        assert_eq!(roots.len(), 2);
        // パラメータが先
        assert_eq!(container.child_snapshot(roots[0]).unwrap().name, "argc");
        assert_eq!(container.child_snapshot(roots[1]).unwrap().name, "p");

        // 第1階層は即座に実体化される: p の子は x, y
        let p_node = container.child_snapshot(roots[1]).unwrap().node.unwrap();
        let children = container.node_children(p_node);
        assert_eq!(children.len(), 2);
        assert_eq!(container.child_snapshot(children[0]).unwrap().name, "x");

        // 深い階層は遅延のまま: x はまだノードを持たない
        assert!(container.child_snapshot(children[0]).unwrap().node.is_none());
    }

    #[test]
    fn test_add_child_nodes_is_idempotent() {
        let target = TestTarget::with_memory(0x1000, vec![0; 32]);
        let manager = ValueNodeManager::new(Arc::new(TypeHandlerRoster::with_default_handlers()));
        manager
            .set_stack_frame(Some(&frame_with_point()), &target.loader)
            .unwrap();

        let container = manager.container().unwrap();
        let p = container.root_children()[1];
        manager.add_child_nodes(p, &target.loader).unwrap();
        manager.add_child_nodes(p, &target.loader).unwrap();

        let node = container.child_snapshot(p).unwrap().node.unwrap();
        assert_eq!(container.node_children(node).len(), 2);
    }

    #[derive(Default)]
    struct DeletionCounter {
        deleted: AtomicUsize,
    }

    impl ContainerListener for DeletionCounter {
        fn value_node_children_deleted(&self, _node: NodeId) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_frame_switch_tears_down_previous_container() {
        let target = TestTarget::with_memory(0x1000, vec![0; 32]);
        let manager = ValueNodeManager::new(Arc::new(TypeHandlerRoster::with_default_handlers()));
        let counter = Arc::new(DeletionCounter::default());
        manager.add_listener(Arc::clone(&counter) as Arc<dyn ContainerListener>);

        manager
            .set_stack_frame(Some(&frame_with_point()), &target.loader)
            .unwrap();
        let old = manager.container().unwrap();
        let old_generation = old.generation();

        manager.set_stack_frame(None, &target.loader).unwrap();
        assert!(manager.container().is_none());
        // p のノードが子を持っていたので削除通知が飛ぶ
        assert!(counter.deleted.load(Ordering::SeqCst) >= 1);
        assert!(old.generation() > old_generation);
    }

    #[test]
    fn test_manager_listener_survives_frame_switch() {
        let target = TestTarget::with_memory(0x1000, vec![0; 32]);
        let manager = ValueNodeManager::new(Arc::new(TypeHandlerRoster::with_default_handlers()));

        #[derive(Default)]
        struct CreationCounter {
            created: AtomicUsize,
        }
        impl ContainerListener for CreationCounter {
            fn value_node_children_created(&self, _node: NodeId, _children: &[ChildId]) {
                self.created.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(CreationCounter::default());
        manager.add_listener(Arc::clone(&counter) as Arc<dyn ContainerListener>);

        manager
            .set_stack_frame(Some(&frame_with_point()), &target.loader)
            .unwrap();
        let first = counter.created.load(Ordering::SeqCst);
        assert!(first >= 1);

        // 2枚目のフレームでも同じリスナーが通知を受ける
        manager
            .set_stack_frame(Some(&frame_with_point()), &target.loader)
            .unwrap();
        assert!(counter.created.load(Ordering::SeqCst) > first);
    }

    #[test]
    fn test_vec_like_children_deferred_until_value() {
        let mut data = vec![0u8; 0x100];
        data[0..4].copy_from_slice(&2i32.to_le_bytes());
        data[8..16].copy_from_slice(&0x5000u64.to_le_bytes());
        let target = TestTarget::with_memory(0x1000, data);

        let manager = ValueNodeManager::new(Arc::new(TypeHandlerRoster::with_default_handlers()));
        let frame = StackFrame {
            function_name: None,
            pc: 0,
            frame_base: None,
            parameters: Vec::new(),
            locals: vec![Variable::new(
                "l",
                testutil::list_type(),
                Arc::new(ValueLocation::from_memory(0x1000, 16)),
            )],
        };
        manager.set_stack_frame(Some(&frame), &target.loader).unwrap();

        let container = manager.container().unwrap();
        let root = container.root_children()[0];
        let node = container.child_snapshot(root).unwrap().node.unwrap();

        // 値が未解決の間は子が作られない
        assert!(container.node_children(node).is_empty());

        // 解決後に子を作れる
        let resolution = nodes::resolve_node_value(&container, node, &target.loader);
        container.publish_node_resolution(node, container.generation(), resolution);
        manager.add_child_nodes(root, &target.loader).unwrap();
        let children = container.node_children(node);
        assert_eq!(children.len(), 2);
        match container.child_snapshot(children[0]).unwrap().origin {
            ChildOrigin::Absolute { address } => assert_eq!(address, 0x5000),
            ref other => panic!("unexpected origin {:?}", other),
        }
    }
}
