//! 値解決エンジン
//!
//! ブロックしうるターゲットI/O（メモリ読み取り）を呼び出し元スレッドから
//! 切り離すワーカープールです。解決要求はチケットになり、呼び出し側は
//! チケットで結果を待ちます。同じノードへの同時要求は1回の解決に束ね
//! られ、全員が同一の結果を受け取ります。

use crate::container::{NodeId, NodeResolution, ResolveClaim, ValueNodeContainer};
use crate::nodes;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::debug;
use tsubaki_value::{Error, Result, ValueLoader};

/// デフォルトのワーカー数
///
/// ポインタの指す先のように親ノードの解決を待つ入れ子の待機が起きるため、
/// 2本以上にして待機中でもプールが進行できるようにします。
pub const DEFAULT_WORKER_COUNT: usize = 2;

struct Job {
    container: Arc<ValueNodeContainer>,
    node: NodeId,
    generation: u64,
    loader: ValueLoader,
}

/// 解決結果の受け取りチケット
pub struct ResolutionTicket {
    done: Option<NodeResolution>,
    receiver: Option<Receiver<NodeResolution>>,
}

impl ResolutionTicket {
    fn done(resolution: NodeResolution) -> Self {
        Self {
            done: Some(resolution),
            receiver: None,
        }
    }

    fn pending(receiver: Receiver<NodeResolution>) -> Self {
        Self {
            done: None,
            receiver: Some(receiver),
        }
    }

    /// 解決完了まで待つ
    ///
    /// コンテナが破棄された（フレーム切り替え等）場合は `Cancelled` を
    /// 返します。
    pub fn wait(self) -> Result<NodeResolution> {
        if let Some(done) = self.done {
            return Ok(done);
        }
        match self.receiver {
            Some(receiver) => receiver.recv().map_err(|_| Error::Cancelled),
            None => Err(Error::Cancelled),
        }
    }
}

/// 値解決エンジン
pub struct ValueResolver {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ValueResolver {
    /// デフォルトのワーカー数でエンジンを起動する
    pub fn new() -> Result<Self> {
        Self::with_workers(DEFAULT_WORKER_COUNT)
    }

    /// 指定したワーカー数でエンジンを起動する
    pub fn with_workers(count: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(count);
        for i in 0..count.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("value-resolver-{}", i))
                .spawn(move || worker_loop(receiver))
                .map_err(Error::io)?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers,
        })
    }

    /// ノードの解決を要求する
    ///
    /// すでに終端状態なら既存の結果がそのままチケットになり、解決中なら
    /// 待機チケットになります。未解決の場合のみジョブがキューに入ります。
    pub fn request_resolution(
        &self,
        container: &Arc<ValueNodeContainer>,
        node: NodeId,
        loader: &ValueLoader,
    ) -> Result<ResolutionTicket> {
        match container.claim_node_resolution(node)? {
            ResolveClaim::Done(resolution) => Ok(ResolutionTicket::done(resolution)),
            ResolveClaim::Pending(receiver) => Ok(ResolutionTicket::pending(receiver)),
            ResolveClaim::Claimed {
                receiver,
                generation,
            } => {
                let sender = self.sender.lock().unwrap();
                let sender = sender.as_ref().ok_or(Error::Cancelled)?;
                sender
                    .send(Job {
                        container: Arc::clone(container),
                        node,
                        generation,
                        loader: loader.clone(),
                    })
                    .map_err(|_| Error::Cancelled)?;
                Ok(ResolutionTicket::pending(receiver))
            }
        }
    }

    /// ノードを解決して結果を待つ
    pub fn resolve_and_wait(
        &self,
        container: &Arc<ValueNodeContainer>,
        node: NodeId,
        loader: &ValueLoader,
    ) -> Result<NodeResolution> {
        self.request_resolution(container, node, loader)?.wait()
    }
}

impl Drop for ValueResolver {
    fn drop(&mut self) {
        // 送信側を閉じるとワーカーは残りのジョブを処理して終了する
        self.sender.lock().unwrap().take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };
        match job {
            Ok(job) => {
                debug!("resolving node {:?}", job.node);
                resolve_node(&job.container, job.node, job.generation, &job.loader);
            }
            Err(_) => break,
        }
    }
}

/// ノードを解決して結果を公開する
///
/// 所有する子スロットのロケーションが親ノードに依存する場合（ポインタの
/// 指す先、メンバなど）、親を先に解決します。親が他のワーカーで解決中の
/// 場合はその完了を待ちます。
fn resolve_node(
    container: &Arc<ValueNodeContainer>,
    node: NodeId,
    generation: u64,
    loader: &ValueLoader,
) {
    if let Err(err) = ensure_parent_resolved(container, node, loader) {
        container.publish_node_resolution(
            node,
            generation,
            NodeResolution {
                location: None,
                value: None,
                status: Err(err),
            },
        );
        return;
    }

    let resolution = nodes::resolve_node_value(container, node, loader);
    container.publish_node_resolution(node, generation, resolution);
}

/// 所有する子スロットの親ノードを終端状態まで進める
fn ensure_parent_resolved(
    container: &Arc<ValueNodeContainer>,
    node: NodeId,
    loader: &ValueLoader,
) -> Result<()> {
    let snapshot = container.node_snapshot(node).ok_or(Error::Cancelled)?;
    let owner = container
        .child_snapshot(snapshot.owner)
        .ok_or(Error::Cancelled)?;
    if owner.state.is_terminal() {
        return Ok(());
    }
    let parent = match owner.parent {
        Some(parent) => parent,
        None => return Ok(()),
    };

    match container.claim_node_resolution(parent)? {
        ResolveClaim::Done(_) => Ok(()),
        ResolveClaim::Claimed { generation, .. } => {
            // 同じワーカーで親をインラインに解決する（自己デッドロック回避）
            resolve_node(container, parent, generation, loader);
            Ok(())
        }
        ResolveClaim::Pending(receiver) => {
            receiver.recv().map_err(|_| Error::Cancelled)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerListener;
    use crate::nodes::{create_node_children, NodeBehavior};
    use crate::testutil::{self, TestTarget};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tsubaki_value::{Value, ValueLocation, ValueType};

    #[derive(Default)]
    struct ValueChangeCounter {
        count: AtomicUsize,
    }

    impl ContainerListener for ValueChangeCounter {
        fn value_node_value_changed(&self, _node: NodeId) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_concurrent_waiters_observe_same_result() {
        let target = TestTarget::with_memory(0x1000, vec![42, 0, 0, 0]);
        let container = Arc::new(ValueNodeContainer::new());
        let counter = Arc::new(ValueChangeCounter::default());
        container.add_listener(Arc::clone(&counter) as Arc<dyn ContainerListener>);

        let child = container.add_root_child(
            "x",
            testutil::int32(),
            Arc::new(ValueLocation::from_memory(0x1000, 4)),
        );
        let node = container
            .set_child_node(
                child,
                testutil::int32(),
                NodeBehavior::Primitive {
                    value_type: ValueType::Int32,
                },
            )
            .unwrap();

        let resolver = Arc::new(ValueResolver::with_workers(2).unwrap());

        // 4スレッドから同じノードの解決を要求する
        let mut handles = Vec::new();
        for _ in 0..4 {
            let resolver = Arc::clone(&resolver);
            let container = Arc::clone(&container);
            let loader = target.loader.clone();
            handles.push(thread::spawn(move || {
                resolver.resolve_and_wait(&container, node, &loader).unwrap()
            }));
        }
        for handle in handles {
            let resolution = handle.join().unwrap();
            assert!(resolution.status.is_ok());
            assert_eq!(resolution.value, Some(Value::Int32(42)));
        }

        // 解決は1回だけ（値変更通知が1回）
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pointer_target_resolves_parent_first() {
        // 0x3000 にアドレス 0x4000、0x4000 に int32 の 7
        let mut data = 0x4000u64.to_le_bytes().to_vec();
        data.resize(0x1000, 0);
        data.extend_from_slice(&7i32.to_le_bytes());
        let target = TestTarget::with_memory(0x3000, data);

        let container = Arc::new(ValueNodeContainer::new());
        let pointer = testutil::pointer_to(testutil::int32());
        let child = container.add_root_child(
            "p",
            Arc::clone(&pointer),
            Arc::new(ValueLocation::from_memory(0x3000, 8)),
        );
        let node = container
            .set_child_node(
                child,
                pointer,
                NodeBehavior::Address {
                    target: testutil::int32(),
                },
            )
            .unwrap();

        let children = create_node_children(&container, node, None, &target.loader).unwrap();
        let target_node = container
            .set_child_node(
                children[0],
                testutil::int32(),
                NodeBehavior::Primitive {
                    value_type: ValueType::Int32,
                },
            )
            .unwrap();

        // 親（ポインタ）が未解決のまま指す先を要求する
        let resolver = ValueResolver::with_workers(2).unwrap();
        let resolution = resolver
            .resolve_and_wait(&container, target_node, &target.loader)
            .unwrap();
        assert!(resolution.status.is_ok());
        assert_eq!(resolution.value, Some(Value::Int32(7)));

        // 親も終端状態になっている
        let parent = container.node_resolution(node).unwrap();
        assert_eq!(parent.value, Some(Value::Address(0x4000)));
    }

    #[test]
    fn test_failed_resolution_is_terminal_for_all_waiters() {
        // 読み取れないアドレスを指すロケーション
        let target = TestTarget::with_memory(0x1000, vec![0; 4]);
        let container = Arc::new(ValueNodeContainer::new());
        let child = container.add_root_child(
            "x",
            testutil::int32(),
            Arc::new(ValueLocation::from_memory(0xdead_0000, 4)),
        );
        let node = container
            .set_child_node(
                child,
                testutil::int32(),
                NodeBehavior::Primitive {
                    value_type: ValueType::Int32,
                },
            )
            .unwrap();

        let resolver = ValueResolver::with_workers(2).unwrap();
        let first = resolver
            .resolve_and_wait(&container, node, &target.loader)
            .unwrap();
        assert!(first.status.is_err());

        // 2回目の要求は再解決せず同じ終端エラーを返す
        let second = resolver
            .resolve_and_wait(&container, node, &target.loader)
            .unwrap();
        assert_eq!(second.status, first.status);
    }
}
