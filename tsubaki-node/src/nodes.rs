//! 型種別ごとの具象ノード
//!
//! ノードの振る舞いは閉じたタグ付きユニオン `NodeBehavior` で表現します。
//! 値の解決と子の作成はここで種別ごとに分岐し、コンテナのスナップショット
//! を入力に、ロックの外で計算してからコミットします。

use crate::container::{
    ChildId, ChildOrigin, NodeId, NodeResolution, ResolutionState, ValueNodeContainer,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use tsubaki_value::{
    Error, PieceKind, Result, Type, TypeKind, TypeVariant, Value, ValueLoader, ValueLocation,
    ValueType, MAX_STRING_LENGTH,
};

/// 配列の子のデフォルトウィンドウ幅
pub const DEFAULT_ARRAY_WINDOW: u64 = 10;

/// コンテナ型ノードが一度に見せる要素数の上限
pub const MAX_CONTAINER_CHILDREN: u64 = 20;

/// C文字列ノードの形態
#[derive(Debug, Clone)]
pub enum CStringKind {
    /// (u)int8 へのポインタ（アドレスを読んでから文字列を読む）
    Pointer,
    /// (u)int8 の固定長配列（ロケーションのアドレスをそのまま使う）
    Array { max_length: u64 },
}

/// 子作成要求（コンテナへのコミット単位）
#[derive(Debug, Clone)]
pub struct NewChild {
    pub name: String,
    pub ty: Arc<Type>,
    pub origin: ChildOrigin,
    pub hidden: bool,
    /// 配列要素の添字（ウィンドウ再作成時の重複排除に使う）
    pub element_index: Option<i64>,
}

/// ノードの振る舞い（型種別ごとの解決アルゴリズム）
#[derive(Debug, Clone)]
pub enum NodeBehavior {
    /// 数値・ブール
    Primitive { value_type: ValueType },
    /// ポインタ・参照（値は指す先のアドレス）
    Address { target: Arc<Type> },
    /// 構造体・クラス・Union（値は持たず、子はメンバと基底型）
    Compound,
    /// 列挙型
    Enumeration,
    /// 配列の1次元分。外側の次元は隠し中間ノードとして再帰する
    Array {
        dimension: usize,
        index_prefix: Vec<i64>,
        created: BTreeSet<i64>,
    },
    /// NUL終端文字列
    CString { kind: CStringKind },
    /// メンバポインタ（アドレス幅の整数として読む）
    PointerToMember,
    /// 実行時の要素数フィールドを持つコンテナ型
    VecLike {
        element: Arc<Type>,
        pointer_member: usize,
        count_member: usize,
    },
    /// 不透明な構造体（生のバイト列としてアクセス可能性のみ検証する）
    RawBlob,
}

impl NodeBehavior {
    /// 子の列挙にノード自身の解決が必要か
    ///
    /// コンテナ型は要素数と先頭アドレスをターゲットメモリから読むため、
    /// ロケーション解決後でないと子を作成できません。
    pub fn children_creation_needs_value(&self) -> bool {
        matches!(self, NodeBehavior::VecLike { .. })
    }
}

/// アーキテクチャのアドレス幅に対応する整数型
fn address_value_type(loader: &ValueLoader) -> ValueType {
    if loader.architecture().address_size() == 8 {
        ValueType::UInt64
    } else {
        ValueType::UInt32
    }
}

/// ロケーションをアドレス幅の整数として読み、アドレス値にする
fn load_address(loader: &ValueLoader, location: &ValueLocation) -> Result<u64> {
    let value = loader.load_value(location, address_value_type(loader), false)?;
    value.to_address().ok_or(Error::BadValue)
}

/// 子のロケーションを親からの相対で解決する
///
/// `PointerTarget` は親ノードの値を、メンバや配列要素は親ノードの
/// ロケーションを前提とします。前提が揃っていない場合は `BadValue` を
/// 返します（呼び出し側が親を先に解決してから再試行します）。
pub fn resolve_child_location(
    container: &ValueNodeContainer,
    child: ChildId,
) -> Result<Arc<ValueLocation>> {
    let snapshot = container.child_snapshot(child).ok_or(Error::Cancelled)?;

    let parent_snapshot = |required: bool| -> Result<Option<crate::container::NodeSnapshot>> {
        match snapshot.parent {
            Some(parent) => Ok(container.node_snapshot(parent)),
            None if required => Err(Error::BadValue),
            None => Ok(None),
        }
    };

    match &snapshot.origin {
        ChildOrigin::Variable { location } => Ok(Arc::clone(location)),

        ChildOrigin::DataMember { member_index } => {
            let parent = parent_snapshot(true)?.ok_or(Error::Cancelled)?;
            let parent_location = parent.location.ok_or(Error::BadValue)?;
            let raw = parent.ty.resolve_raw_type(false);
            let members = match raw.variant() {
                TypeVariant::Compound { members, .. } => members,
                _ => return Err(Error::BadValue),
            };
            let member = members.get(*member_index).ok_or(Error::BadValue)?;
            let location = raw.resolve_data_member_location(member, &parent_location)?;
            Ok(Arc::new(location))
        }

        ChildOrigin::BaseType { base_index } => {
            let parent = parent_snapshot(true)?.ok_or(Error::Cancelled)?;
            let parent_location = parent.location.ok_or(Error::BadValue)?;
            let raw = parent.ty.resolve_raw_type(false);
            let base_types = match raw.variant() {
                TypeVariant::Compound { base_types, .. } => base_types,
                _ => return Err(Error::BadValue),
            };
            let base = base_types.get(*base_index).ok_or(Error::BadValue)?;
            let location = raw.resolve_base_type_location(base, &parent_location)?;
            Ok(Arc::new(location))
        }

        ChildOrigin::PointerTarget => {
            let parent = parent_snapshot(true)?.ok_or(Error::Cancelled)?;
            // 親ポインタの値（指す先のアドレス）が先に必要
            let value = parent.value.ok_or(Error::BadValue)?;
            let address = value.to_address().ok_or(Error::BadValue)?;
            let raw = snapshot.ty.resolve_raw_type(false);
            let location = raw.resolve_object_data_location_from_address(address)?;
            Ok(Arc::new(location))
        }

        ChildOrigin::ArrayElement { index_path } => {
            let parent = parent_snapshot(true)?.ok_or(Error::Cancelled)?;
            let parent_location = parent.location.ok_or(Error::BadValue)?;
            let raw = parent.ty.resolve_raw_type(false);
            let location = raw.resolve_element_location(index_path, &parent_location)?;
            Ok(Arc::new(location))
        }

        // 内部次元ノードは配列全体のロケーションを引き継ぐ
        ChildOrigin::ArrayDimension { .. } => {
            let parent = parent_snapshot(true)?.ok_or(Error::Cancelled)?;
            parent.location.ok_or(Error::BadValue)
        }

        ChildOrigin::Absolute { address } => {
            let raw = snapshot.ty.resolve_raw_type(false);
            let location = raw.resolve_object_data_location_from_address(*address)?;
            Ok(Arc::new(location))
        }
    }
}

/// ノードのロケーションと値を解決する
///
/// 失敗してもエラーを `NodeResolution` に畳み込んで返します（呼び出し側が
/// そのまま公開することで、全ウェイターが同一の終端状態を観測します）。
pub fn resolve_node_value(
    container: &ValueNodeContainer,
    node: NodeId,
    loader: &ValueLoader,
) -> NodeResolution {
    match try_resolve_node_value(container, node, loader) {
        Ok((location, value)) => NodeResolution {
            location: Some(location),
            value,
            status: Ok(()),
        },
        Err(err) => {
            debug!("node resolution failed: {}", err);
            NodeResolution {
                location: None,
                value: None,
                status: Err(err),
            }
        }
    }
}

fn try_resolve_node_value(
    container: &ValueNodeContainer,
    node: NodeId,
    loader: &ValueLoader,
) -> Result<(Arc<ValueLocation>, Option<Value>)> {
    let snapshot = container.node_snapshot(node).ok_or(Error::Cancelled)?;

    // まず所有している子スロットのロケーションを確定させる
    let owner = container
        .child_snapshot(snapshot.owner)
        .ok_or(Error::Cancelled)?;
    let location = match &owner.state {
        ResolutionState::Resolved => owner.location.ok_or(Error::BadValue)?,
        ResolutionState::Failed(err) => return Err(err.clone()),
        _ => {
            let result = resolve_child_location(container, snapshot.owner);
            container.set_child_location(snapshot.owner, result.clone())?;
            result?
        }
    };

    let value = match &snapshot.behavior {
        NodeBehavior::Primitive { value_type } => {
            // 整数・ブールは短い値のゼロ拡張を許す
            let short_ok = value_type.is_integer();
            Some(loader.load_value(&location, *value_type, short_ok)?)
        }

        NodeBehavior::Address { .. } | NodeBehavior::PointerToMember => {
            Some(Value::Address(load_address(loader, &location)?))
        }

        NodeBehavior::Enumeration => {
            let raw = snapshot.ty.resolve_raw_type(false);
            let (base, values) = match raw.variant() {
                TypeVariant::Enumeration { base, values } => (base, values),
                _ => return Err(Error::BadValue),
            };
            // 幅は基底型から、無ければバイトサイズから推測する
            let value_type = base
                .as_ref()
                .map(|base| base.resolve_raw_type(false))
                .and_then(|base| match base.variant() {
                    TypeVariant::Primitive { value_type } => Some(*value_type),
                    _ => None,
                })
                .unwrap_or_else(|| ValueType::signed_of_byte_size(raw.byte_size()));
            let loaded = loader.load_value(&location, value_type, true)?;
            let int = loaded.to_int().ok_or(Error::BadValue)?;
            let name = values
                .iter()
                .find(|candidate| candidate.value == int)
                .map(|candidate| candidate.name.clone());
            Some(Value::Enumeration { name, value: int })
        }

        NodeBehavior::CString { kind } => {
            let string = match kind {
                CStringKind::Pointer => {
                    let address = load_address(loader, &location)?;
                    loader.load_string_value(address, MAX_STRING_LENGTH)?
                }
                CStringKind::Array { max_length } => {
                    let piece = location.piece_at(0).ok_or(Error::BadValue)?;
                    let address = match piece.kind {
                        PieceKind::Memory(address) => address,
                        _ => return Err(Error::Unsupported),
                    };
                    loader.load_string_value(address, *max_length as usize)?
                }
            };
            Some(Value::String(string))
        }

        NodeBehavior::RawBlob => {
            // アクセス可能性のみ検証する（フィールドのデコードは未対応）
            let piece = location.piece_at(0).ok_or(Error::BadValue)?;
            let address = match piece.kind {
                PieceKind::Memory(address) => address,
                _ => return Err(Error::Unsupported),
            };
            loader.load_raw_value(address, snapshot.ty.byte_size() as usize)?;
            None
        }

        // 複合型・配列・コンテナ型はロケーションのみ（子が個々の値を持つ）
        NodeBehavior::Compound | NodeBehavior::Array { .. } | NodeBehavior::VecLike { .. } => None,
    };

    Ok((location, value))
}

/// ノードの子を作成する
///
/// `range` は配列ノードの明示的なウィンドウ指定（下限・上限、両端含む）
/// です。配列以外では無視されます。冪等で、2回目以降の呼び出しは既存の
/// 子をそのまま返します（配列のウィンドウ拡張を除く）。
pub fn create_node_children(
    container: &ValueNodeContainer,
    node: NodeId,
    range: Option<(i64, i64)>,
    loader: &ValueLoader,
) -> Result<Vec<ChildId>> {
    let snapshot = container.node_snapshot(node).ok_or(Error::Cancelled)?;

    let new_children = match &snapshot.behavior {
        NodeBehavior::Primitive { .. }
        | NodeBehavior::Enumeration
        | NodeBehavior::PointerToMember
        | NodeBehavior::CString { .. }
        | NodeBehavior::RawBlob => Vec::new(),

        NodeBehavior::Compound => compound_children(&snapshot.ty)?,

        NodeBehavior::Address { target } => {
            let raw = target.resolve_raw_type(false);
            match raw.kind() {
                // 関数や不完全型の指す先は展開しない
                TypeKind::Function | TypeKind::Unspecified => Vec::new(),
                _ => vec![NewChild {
                    name: format!("*{}", snapshot.owner_name),
                    ty: Arc::clone(target),
                    origin: ChildOrigin::PointerTarget,
                    hidden: false,
                    element_index: None,
                }],
            }
        }

        NodeBehavior::Array {
            dimension,
            index_prefix,
            ..
        } => array_children(&snapshot.ty, *dimension, index_prefix, range)?,

        NodeBehavior::VecLike {
            element,
            pointer_member,
            count_member,
        } => vec_like_children(&snapshot, element, *pointer_member, *count_member, loader)?,
    };

    let added = container.commit_node_children(node, new_children)?;

    // 内部次元ノードはロスターを経由せず、ここで直接ノードを与える
    for child in &added {
        let child_snapshot = match container.child_snapshot(*child) {
            Some(snapshot) => snapshot,
            None => continue,
        };
        if let ChildOrigin::ArrayDimension {
            dimension,
            index_prefix,
        } = child_snapshot.origin
        {
            container.set_child_node(
                *child,
                Arc::clone(&snapshot.ty),
                NodeBehavior::Array {
                    dimension,
                    index_prefix,
                    created: BTreeSet::new(),
                },
            )?;
        }
    }

    Ok(added)
}

/// 複合型の子: 基底型ごとに1つ + データメンバごとに1つ
fn compound_children(ty: &Arc<Type>) -> Result<Vec<NewChild>> {
    let raw = ty.resolve_raw_type(false);
    let (base_types, members) = match raw.variant() {
        TypeVariant::Compound {
            base_types,
            members,
            ..
        } => (base_types, members),
        _ => return Err(Error::BadValue),
    };

    let mut children = Vec::with_capacity(base_types.len() + members.len());
    for (index, base) in base_types.iter().enumerate() {
        children.push(NewChild {
            name: base.name.clone(),
            ty: Arc::clone(&base.ty),
            origin: ChildOrigin::BaseType { base_index: index },
            hidden: false,
            element_index: None,
        });
    }
    for (index, member) in members.iter().enumerate() {
        children.push(NewChild {
            name: member.name.clone(),
            ty: Arc::clone(&member.ty),
            origin: ChildOrigin::DataMember {
                member_index: index,
            },
            hidden: false,
            element_index: None,
        });
    }
    Ok(children)
}

/// 配列ノードの子: ウィンドウ内の要素（最終次元）または隠し中間ノード
fn array_children(
    ty: &Arc<Type>,
    dimension: usize,
    index_prefix: &[i64],
    range: Option<(i64, i64)>,
) -> Result<Vec<NewChild>> {
    let raw = ty.resolve_raw_type(false);
    let (element, dimensions) = match raw.variant() {
        TypeVariant::Array {
            element,
            dimensions,
        } => (element, dimensions),
        _ => return Err(Error::BadValue),
    };
    let dim = dimensions.get(dimension).ok_or(Error::BadValue)?;

    let (low, high) = match range {
        Some((low, high)) => {
            if high < low {
                return Err(Error::BadValue);
            }
            (low, high)
        }
        None => {
            // デフォルトは先頭の固定幅ウィンドウ。要素数が不明な次元は
            // 明示的な範囲指定が必要
            let count = dim.count().ok_or(Error::Unsupported)?;
            let low = dim.lower_bound();
            (low, low + count.min(DEFAULT_ARRAY_WINDOW) as i64 - 1)
        }
    };

    let last_dimension = dimension + 1 == dimensions.len();
    let mut children = Vec::with_capacity((high - low + 1) as usize);
    for index in low..=high {
        let mut path = index_prefix.to_vec();
        path.push(index);
        if last_dimension {
            children.push(NewChild {
                name: format!("[{}]", index),
                ty: Arc::clone(element),
                origin: ChildOrigin::ArrayElement { index_path: path },
                hidden: false,
                element_index: Some(index),
            });
        } else {
            children.push(NewChild {
                name: format!("[{}]", index),
                ty: Arc::clone(&raw),
                origin: ChildOrigin::ArrayDimension {
                    dimension: dimension + 1,
                    index_prefix: path,
                },
                hidden: true,
                element_index: Some(index),
            });
        }
    }
    Ok(children)
}

/// コンテナ型の子: 要素数フィールドと先頭ポインタをターゲットから読む
fn vec_like_children(
    snapshot: &crate::container::NodeSnapshot,
    element: &Arc<Type>,
    pointer_member: usize,
    count_member: usize,
    loader: &ValueLoader,
) -> Result<Vec<NewChild>> {
    // ノード自身のロケーション解決が前提
    let location = snapshot.location.as_ref().ok_or(Error::BadValue)?;
    let raw = snapshot.ty.resolve_raw_type(false);
    let members = match raw.variant() {
        TypeVariant::Compound { members, .. } => members,
        _ => return Err(Error::BadValue),
    };

    let count_field = members.get(count_member).ok_or(Error::BadValue)?;
    let count_location = raw.resolve_data_member_location(count_field, location)?;
    let count_type = ValueType::signed_of_byte_size(count_field.ty.byte_size());
    let count = loader
        .load_value(&count_location, count_type, true)?
        .to_int()
        .ok_or(Error::BadValue)?
        .max(0) as u64;

    let pointer_field = members.get(pointer_member).ok_or(Error::BadValue)?;
    let pointer_location = raw.resolve_data_member_location(pointer_field, location)?;
    let base = load_address(loader, &pointer_location)?;

    let stride = match element.byte_size() {
        0 => loader.architecture().address_size(),
        size => size,
    };

    let shown = count.min(MAX_CONTAINER_CHILDREN);
    debug!("container node has {} items, showing {}", count, shown);
    let mut children = Vec::with_capacity(shown as usize);
    for index in 0..shown {
        let address = base
            .checked_add(index.checked_mul(stride).ok_or(Error::BadValue)?)
            .ok_or(Error::BadValue)?;
        children.push(NewChild {
            name: format!("[{}]", index),
            ty: Arc::clone(element),
            origin: ChildOrigin::Absolute { address },
            hidden: false,
            element_index: None,
        });
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, TestTarget};
    use tsubaki_value::ArrayDimension;

    #[test]
    fn test_primitive_value_resolution() {
        // メモリ上の 01 00 00 00 をリトルエンディアンの int32 として読む
        let target = TestTarget::with_memory(0x1000, vec![1, 0, 0, 0]);
        let container = ValueNodeContainer::new();
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

        let resolution = resolve_node_value(&container, node, &target.loader);
        assert!(resolution.status.is_ok());
        assert_eq!(resolution.value, Some(Value::Int32(1)));
    }

    #[test]
    fn test_compound_children_and_member_value() {
        // struct Point { int32 x; int32 y; } のエンドツーエンド
        let target = TestTarget::with_memory(0x1000, vec![1, 0, 0, 0, 2, 0, 0, 0]);
        let container = ValueNodeContainer::new();
        let point = testutil::point_type();
        let child = container.add_root_child(
            "p",
            Arc::clone(&point),
            Arc::new(ValueLocation::from_memory(0x1000, 8)),
        );
        let node = container
            .set_child_node(child, point, NodeBehavior::Compound)
            .unwrap();

        // 複合型ノード自身の解決（ロケーションのみ）
        let resolution = resolve_node_value(&container, node, &target.loader);
        assert!(resolution.status.is_ok());
        assert!(resolution.value.is_none());
        // コミットしてから子を作る
        container.publish_node_resolution(node, container.generation(), resolution);

        let children = create_node_children(&container, node, None, &target.loader).unwrap();
        assert_eq!(children.len(), 2);
        let names: Vec<String> = children
            .iter()
            .map(|c| container.child_snapshot(*c).unwrap().name)
            .collect();
        assert_eq!(names, vec!["x", "y"]);

        // x の値を解決する
        let x_node = container
            .set_child_node(
                children[0],
                testutil::int32(),
                NodeBehavior::Primitive {
                    value_type: ValueType::Int32,
                },
            )
            .unwrap();
        let resolution = resolve_node_value(&container, x_node, &target.loader);
        assert_eq!(resolution.value, Some(Value::Int32(1)));
    }

    #[test]
    fn test_array_windowing_accumulates() {
        // 要素数不明の配列: 明示ウィンドウ 0..9 と 20..29 で計20個
        let target = TestTarget::with_memory(0x2000, vec![0; 256]);
        let container = ValueNodeContainer::new();
        let array = Arc::new(Type::new(
            40,
            "int32[]",
            0,
            TypeVariant::Array {
                element: testutil::int32(),
                dimensions: vec![ArrayDimension { bounds: None }],
            },
        ));
        let child = container.add_root_child(
            "a",
            Arc::clone(&array),
            Arc::new(ValueLocation::from_memory(0x2000, 0)),
        );
        let node = container
            .set_child_node(
                child,
                array,
                NodeBehavior::Array {
                    dimension: 0,
                    index_prefix: Vec::new(),
                    created: BTreeSet::new(),
                },
            )
            .unwrap();

        // デフォルトウィンドウは要素数不明なので失敗する
        assert_eq!(
            create_node_children(&container, node, None, &target.loader),
            Err(Error::Unsupported)
        );

        let first = create_node_children(&container, node, Some((0, 9)), &target.loader).unwrap();
        assert_eq!(first.len(), 10);
        let second =
            create_node_children(&container, node, Some((20, 29)), &target.loader).unwrap();
        assert_eq!(second.len(), 10);

        // 重複ウィンドウは追加されない
        let third = create_node_children(&container, node, Some((0, 9)), &target.loader).unwrap();
        assert!(third.is_empty());
        assert_eq!(container.node_children(node).len(), 20);
    }

    #[test]
    fn test_multi_dimension_array_creates_hidden_nodes() {
        let target = TestTarget::with_memory(0x2000, vec![0; 48]);
        let container = ValueNodeContainer::new();
        let array = Arc::new(Type::new(
            41,
            "int32[3][4]",
            48,
            TypeVariant::Array {
                element: testutil::int32(),
                dimensions: vec![
                    ArrayDimension { bounds: Some((0, 2)) },
                    ArrayDimension { bounds: Some((0, 3)) },
                ],
            },
        ));
        let child = container.add_root_child(
            "m",
            Arc::clone(&array),
            Arc::new(ValueLocation::from_memory(0x2000, 48)),
        );
        let node = container
            .set_child_node(
                child,
                array,
                NodeBehavior::Array {
                    dimension: 0,
                    index_prefix: Vec::new(),
                    created: BTreeSet::new(),
                },
            )
            .unwrap();

        let children = create_node_children(&container, node, None, &target.loader).unwrap();
        assert_eq!(children.len(), 3);

        // 中間ノードは隠され、すでにノードを持つ
        let snapshot = container.child_snapshot(children[0]).unwrap();
        assert!(snapshot.hidden);
        let inner = snapshot.node.expect("dimension child should have a node");
        assert!(container.visible_node_children(node).is_empty());

        // 内側の次元は要素を作る
        let elements = create_node_children(&container, inner, None, &target.loader).unwrap();
        assert_eq!(elements.len(), 4);
        let element = container.child_snapshot(elements[2]).unwrap();
        match element.origin {
            ChildOrigin::ArrayElement { ref index_path } => assert_eq!(index_path, &vec![0, 2]),
            ref other => panic!("unexpected origin {:?}", other),
        }
    }

    #[test]
    fn test_pointer_target_needs_parent_value() {
        let target = TestTarget::with_memory(0x3000, 0x4000u64.to_le_bytes().to_vec());
        let container = ValueNodeContainer::new();
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
        assert_eq!(children.len(), 1);
        assert_eq!(container.child_snapshot(children[0]).unwrap().name, "*p");

        // 親が未解決のうちは指す先のロケーションを解決できない
        assert_eq!(
            resolve_child_location(&container, children[0]),
            Err(Error::BadValue)
        );

        // 親を解決すると指す先が 0x4000 になる
        let resolution = resolve_node_value(&container, node, &target.loader);
        assert_eq!(resolution.value, Some(Value::Address(0x4000)));
        container.publish_node_resolution(node, container.generation(), resolution);

        let location = resolve_child_location(&container, children[0]).unwrap();
        assert_eq!(location.piece_at(0).unwrap().kind, PieceKind::Memory(0x4000));
    }

    #[test]
    fn test_c_string_through_pointer() {
        // 0x3000 にアドレス 0x4000、0x4000 に NUL 終端文字列
        let mut bytes = 0x4000u64.to_le_bytes().to_vec();
        bytes.resize(0x1000, 0);
        let mut data = bytes;
        data.extend_from_slice(b"hello\0");
        let target = TestTarget::with_memory(0x3000, data);

        let container = ValueNodeContainer::new();
        let pointer = testutil::pointer_to(testutil::char_type());
        let child = container.add_root_child(
            "s",
            Arc::clone(&pointer),
            Arc::new(ValueLocation::from_memory(0x3000, 8)),
        );
        let node = container
            .set_child_node(
                child,
                pointer,
                NodeBehavior::CString {
                    kind: CStringKind::Pointer,
                },
            )
            .unwrap();

        let resolution = resolve_node_value(&container, node, &target.loader);
        assert_eq!(resolution.value, Some(Value::String("hello".to_string())));
    }

    #[test]
    fn test_enumeration_maps_value_to_name() {
        let target = TestTarget::with_memory(0x1000, vec![2, 0, 0, 0]);
        let container = ValueNodeContainer::new();
        let color = testutil::enum_type();
        let child = container.add_root_child(
            "c",
            Arc::clone(&color),
            Arc::new(ValueLocation::from_memory(0x1000, 4)),
        );
        let node = container
            .set_child_node(child, color, NodeBehavior::Enumeration)
            .unwrap();

        let resolution = resolve_node_value(&container, node, &target.loader);
        assert_eq!(
            resolution.value,
            Some(Value::Enumeration {
                name: Some("BLUE".to_string()),
                value: 2,
            })
        );
    }

    #[test]
    fn test_vec_like_children_from_runtime_count() {
        // struct List { int32 count; T* items; } 相当
        // count = 3, items = 0x5000
        let mut data = vec![0u8; 0x100];
        data[0..4].copy_from_slice(&3i32.to_le_bytes());
        data[8..16].copy_from_slice(&0x5000u64.to_le_bytes());
        let target = TestTarget::with_memory(0x1000, data);

        let container = ValueNodeContainer::new();
        let list = testutil::list_type();
        let child = container.add_root_child(
            "l",
            Arc::clone(&list),
            Arc::new(ValueLocation::from_memory(0x1000, 16)),
        );
        let node = container
            .set_child_node(
                child,
                list,
                NodeBehavior::VecLike {
                    element: testutil::int32(),
                    pointer_member: 1,
                    count_member: 0,
                },
            )
            .unwrap();
        assert!(container
            .node_snapshot(node)
            .unwrap()
            .behavior
            .children_creation_needs_value());

        // 先にノードを解決してから子を作る
        let resolution = resolve_node_value(&container, node, &target.loader);
        container.publish_node_resolution(node, container.generation(), resolution);

        let children = create_node_children(&container, node, None, &target.loader).unwrap();
        assert_eq!(children.len(), 3);
        let snapshot = container.child_snapshot(children[1]).unwrap();
        match snapshot.origin {
            ChildOrigin::Absolute { address } => assert_eq!(address, 0x5004),
            ref other => panic!("unexpected origin {:?}", other),
        }
    }
}
