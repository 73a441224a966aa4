//! 型ハンドラロスター
//!
//! 型から具象ノードの振る舞いへの多態ディスパッチです。登録された各
//! ハンドラが型への適合度（0.0〜1.0）を申告し、最大スコアのハンドラが
//! ノードを作成します。同点の場合は先に登録されたハンドラが勝ちます
//! （比較が厳密な `>` であるため）。
//!
//! グローバルなシングルトンは持ちません。ロスターは所有者（通常は
//! `ValueNodeManager`）が明示的に構築して引き回します。

use crate::nodes::{CStringKind, NodeBehavior};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::debug;
use tsubaki_value::{
    AddressKind, Error, Result, Type, TypeKind, TypeVariant, ValueType, MAX_STRING_LENGTH,
};

/// 汎用ハンドラの適合度
const GENERIC_SCORE: f32 = 0.5;

/// 特化ハンドラの適合度（汎用より優先される）
const SPECIALIZED_SCORE: f32 = 0.8;

/// 型ハンドラ
///
/// `supports_type` は適合度を返します（0.0 は非対応）。
pub trait TypeHandler: Send + Sync {
    /// ハンドラ名（ログ用）
    fn name(&self) -> &'static str;

    /// 型への適合度を返す
    fn supports_type(&self, ty: &Arc<Type>) -> f32;

    /// 型に対応するノードの振る舞いを作成する
    fn create_value_node(&self, ty: &Arc<Type>) -> Result<NodeBehavior>;
}

/// 型ハンドラロスター
pub struct TypeHandlerRoster {
    handlers: Mutex<Vec<Arc<dyn TypeHandler>>>,
}

impl Default for TypeHandlerRoster {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl TypeHandlerRoster {
    /// 空のロスターを作成する
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// 標準のハンドラ一式を登録したロスターを作成する
    ///
    /// 特化ハンドラ（C文字列、コンテナ、不透明構造体）は汎用ハンドラより
    /// 高い適合度を申告するため、登録順に関わらず優先されます。
    pub fn with_default_handlers() -> Self {
        let roster = Self::new();
        roster.register(Arc::new(CStringHandler));
        roster.register(Arc::new(VecLikeHandler));
        roster.register(Arc::new(OpaqueHandler));
        roster.register(Arc::new(PrimitiveHandler));
        roster.register(Arc::new(AddressHandler));
        roster.register(Arc::new(CompoundHandler));
        roster.register(Arc::new(EnumerationHandler));
        roster.register(Arc::new(ArrayHandler));
        roster.register(Arc::new(PointerToMemberHandler));
        roster
    }

    /// ハンドラを登録する
    pub fn register(&self, handler: Arc<dyn TypeHandler>) {
        self.handlers.lock().unwrap().push(handler);
    }

    /// 最も適合度の高いハンドラを検索する
    ///
    /// 同点の場合は先に登録されたハンドラが選ばれます。
    pub fn find_best_type_handler(&self, ty: &Arc<Type>) -> Option<Arc<dyn TypeHandler>> {
        let handlers = self.handlers.lock().unwrap();
        let mut best: Option<(f32, Arc<dyn TypeHandler>)> = None;
        for handler in handlers.iter() {
            let score = handler.supports_type(ty);
            if score <= 0.0 {
                continue;
            }
            match &best {
                Some((best_score, _)) if score <= *best_score => {}
                _ => best = Some((score, Arc::clone(handler))),
            }
        }
        best.map(|(_, handler)| handler)
    }

    /// 適合するすべてのハンドラを返す
    pub fn find_type_handlers(&self, ty: &Arc<Type>) -> Vec<Arc<dyn TypeHandler>> {
        let handlers = self.handlers.lock().unwrap();
        handlers
            .iter()
            .filter(|handler| handler.supports_type(ty) > 0.0)
            .cloned()
            .collect()
    }

    /// 型に対応するノードの振る舞いを作成する
    ///
    /// 与えられた型にハンドラが無い場合、typedef／修飾子を1層ずつ剥がし
    /// ながら再試行します。剥がしても型が変わらなくなったら `Unsupported`
    /// です。作成に使われた（剥がし後の）型も返します。
    pub fn create_value_node(&self, ty: &Arc<Type>) -> Result<(Arc<Type>, NodeBehavior)> {
        let mut current = Arc::clone(ty);
        loop {
            if let Some(handler) = self.find_best_type_handler(&current) {
                debug!("handler {} selected for type {}", handler.name(), current.name());
                let behavior = handler.create_value_node(&current)?;
                return Ok((current, behavior));
            }
            let next = current.resolve_raw_type(true);
            if Arc::ptr_eq(&next, &current) {
                debug!("no handler for type {}", current.name());
                return Err(Error::Unsupported);
            }
            current = next;
        }
    }
}

struct PrimitiveHandler;

impl TypeHandler for PrimitiveHandler {
    fn name(&self) -> &'static str {
        "primitive"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if ty.kind() == TypeKind::Primitive {
            GENERIC_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, ty: &Arc<Type>) -> Result<NodeBehavior> {
        match ty.variant() {
            TypeVariant::Primitive { value_type } => Ok(NodeBehavior::Primitive {
                value_type: *value_type,
            }),
            _ => Err(Error::Unsupported),
        }
    }
}

struct AddressHandler;

impl TypeHandler for AddressHandler {
    fn name(&self) -> &'static str {
        "address"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if ty.kind() == TypeKind::Address {
            GENERIC_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, ty: &Arc<Type>) -> Result<NodeBehavior> {
        match ty.variant() {
            TypeVariant::Address { target, .. } => Ok(NodeBehavior::Address {
                target: Arc::clone(target),
            }),
            _ => Err(Error::Unsupported),
        }
    }
}

struct CompoundHandler;

impl TypeHandler for CompoundHandler {
    fn name(&self) -> &'static str {
        "compound"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if ty.kind() == TypeKind::Compound {
            GENERIC_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, _ty: &Arc<Type>) -> Result<NodeBehavior> {
        Ok(NodeBehavior::Compound)
    }
}

struct EnumerationHandler;

impl TypeHandler for EnumerationHandler {
    fn name(&self) -> &'static str {
        "enumeration"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if ty.kind() == TypeKind::Enumeration {
            GENERIC_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, _ty: &Arc<Type>) -> Result<NodeBehavior> {
        Ok(NodeBehavior::Enumeration)
    }
}

struct ArrayHandler;

impl TypeHandler for ArrayHandler {
    fn name(&self) -> &'static str {
        "array"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if ty.kind() == TypeKind::Array {
            GENERIC_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, _ty: &Arc<Type>) -> Result<NodeBehavior> {
        Ok(NodeBehavior::Array {
            dimension: 0,
            index_prefix: Vec::new(),
            created: BTreeSet::new(),
        })
    }
}

struct PointerToMemberHandler;

impl TypeHandler for PointerToMemberHandler {
    fn name(&self) -> &'static str {
        "pointer-to-member"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if ty.kind() == TypeKind::PointerToMember {
            GENERIC_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, _ty: &Arc<Type>) -> Result<NodeBehavior> {
        Ok(NodeBehavior::PointerToMember)
    }
}

/// 1バイト整数（charの表現）か
fn is_char_like(ty: &Arc<Type>) -> bool {
    matches!(
        ty.resolve_raw_type(false).variant(),
        TypeVariant::Primitive {
            value_type: ValueType::Int8 | ValueType::UInt8,
        }
    )
}

struct CStringHandler;

impl CStringHandler {
    /// 対応する形態を判定する（非対応なら None）
    fn classify(ty: &Arc<Type>) -> Option<CStringKind> {
        match ty.variant() {
            TypeVariant::Address {
                kind: AddressKind::Pointer,
                target,
            } if is_char_like(target) => Some(CStringKind::Pointer),
            TypeVariant::Array {
                element,
                dimensions,
            } if dimensions.len() == 1 && is_char_like(element) => {
                let max_length = dimensions[0]
                    .count()
                    .unwrap_or(MAX_STRING_LENGTH as u64);
                Some(CStringKind::Array { max_length })
            }
            _ => None,
        }
    }
}

impl TypeHandler for CStringHandler {
    fn name(&self) -> &'static str {
        "c-string"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if Self::classify(ty).is_some() {
            SPECIALIZED_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, ty: &Arc<Type>) -> Result<NodeBehavior> {
        let kind = Self::classify(ty).ok_or(Error::Unsupported)?;
        Ok(NodeBehavior::CString { kind })
    }
}

/// 要素数フィールド名の候補
const COUNT_MEMBER_NAMES: &[&str] = &["count", "len", "length", "item_count", "fItemCount"];

/// 先頭ポインタフィールド名の候補
const POINTER_MEMBER_NAMES: &[&str] = &["items", "ptr", "pointer", "data", "buf", "fObjects"];

struct VecLikeHandler;

impl VecLikeHandler {
    /// 要素数フィールドと先頭ポインタフィールドを名前で探す
    fn classify(ty: &Arc<Type>) -> Option<(Arc<Type>, usize, usize)> {
        let members = match ty.variant() {
            TypeVariant::Compound { members, .. } => members,
            _ => return None,
        };

        let count_member = members.iter().position(|member| {
            COUNT_MEMBER_NAMES.contains(&member.name.as_str())
                && member.ty.resolve_raw_type(false).kind() == TypeKind::Primitive
        })?;
        let pointer_member = members.iter().position(|member| {
            POINTER_MEMBER_NAMES.contains(&member.name.as_str())
                && member.ty.resolve_raw_type(false).kind() == TypeKind::Address
        })?;

        let element = match members[pointer_member].ty.resolve_raw_type(false).variant() {
            TypeVariant::Address { target, .. } => Arc::clone(target),
            _ => return None,
        };
        Some((element, pointer_member, count_member))
    }
}

impl TypeHandler for VecLikeHandler {
    fn name(&self) -> &'static str {
        "vec-like"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        if Self::classify(ty).is_some() {
            SPECIALIZED_SCORE
        } else {
            0.0
        }
    }

    fn create_value_node(&self, ty: &Arc<Type>) -> Result<NodeBehavior> {
        let (element, pointer_member, count_member) =
            Self::classify(ty).ok_or(Error::Unsupported)?;
        Ok(NodeBehavior::VecLike {
            element,
            pointer_member,
            count_member,
        })
    }
}

/// メンバ情報を持たない不透明な構造体
struct OpaqueHandler;

impl TypeHandler for OpaqueHandler {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn supports_type(&self, ty: &Arc<Type>) -> f32 {
        match ty.variant() {
            TypeVariant::Compound {
                base_types,
                members,
                ..
            } if base_types.is_empty() && members.is_empty() && ty.byte_size() > 0 => {
                SPECIALIZED_SCORE
            }
            _ => 0.0,
        }
    }

    fn create_value_node(&self, _ty: &Arc<Type>) -> Result<NodeBehavior> {
        Ok(NodeBehavior::RawBlob)
    }
}
