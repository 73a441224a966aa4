//! 型記述子
//!
//! デバッグ情報から構築される、ターゲット言語の型のイミュータブルな記述です。
//! `Arc<Type>` として多数のノードから共有されます。構築後に変更されることは
//! ありません。

use crate::location::{PieceKind, ValueLocation};
use crate::value::ValueType;
use crate::{Error, Result};
use std::sync::Arc;

/// typedef／修飾子の剥がし深さの上限
///
/// 実際のデバッグ情報に循環は現れませんが、壊れた入力に対する防御として
/// 深さを打ち切ります。
const MAX_STRIP_DEPTH: usize = 32;

/// 型の識別子（デバッグ情報内で安定）
pub type TypeId = u64;

/// 型の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive,
    Compound,
    Modified,
    Typedef,
    Address,
    Enumeration,
    Subrange,
    Array,
    Unspecified,
    Function,
    PointerToMember,
}

/// 複合型の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundKind {
    Struct,
    Class,
    Union,
}

/// アドレス型の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Pointer,
    Reference,
}

/// const / volatile 修飾
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub is_const: bool,
    pub is_volatile: bool,
}

/// 複合型の基底型
#[derive(Debug, Clone)]
pub struct BaseType {
    /// 基底型の名前
    pub name: String,
    /// 基底型
    pub ty: Arc<Type>,
    /// 複合型先頭からのバイトオフセット
    pub byte_offset: u64,
}

/// 複合型のデータメンバ
#[derive(Debug, Clone)]
pub struct DataMember {
    /// メンバ名
    pub name: String,
    /// メンバの型
    pub ty: Arc<Type>,
    /// 複合型先頭からのバイトオフセット
    pub byte_offset: u64,
}

/// 列挙型の値
#[derive(Debug, Clone)]
pub struct EnumerationValue {
    /// 列挙子の名前
    pub name: String,
    /// 列挙子の値
    pub value: i64,
}

/// 配列の次元
#[derive(Debug, Clone, Copy)]
pub struct ArrayDimension {
    /// 添字の範囲（下限・上限）。subrange型が無い場合は None
    pub bounds: Option<(i64, i64)>,
}

impl ArrayDimension {
    /// 次元の要素数を返す（範囲が不明なら None）
    pub fn count(&self) -> Option<u64> {
        self.bounds.and_then(|(lower, upper)| {
            if upper >= lower {
                Some((upper - lower + 1) as u64)
            } else {
                None
            }
        })
    }

    /// 添字の下限を返す（不明なら 0）
    pub fn lower_bound(&self) -> i64 {
        self.bounds.map(|(lower, _)| lower).unwrap_or(0)
    }
}

/// 型のバリアント（閉じたタグ付きユニオン）
#[derive(Debug, Clone)]
pub enum TypeVariant {
    /// 基本型（整数、浮動小数点、ブール）
    Primitive {
        value_type: ValueType,
    },
    /// 構造体・クラス・Union
    Compound {
        kind: CompoundKind,
        base_types: Vec<BaseType>,
        members: Vec<DataMember>,
    },
    /// const / volatile 修飾型
    Modified {
        modifiers: Modifiers,
        inner: Arc<Type>,
    },
    /// typedef
    Typedef {
        inner: Arc<Type>,
    },
    /// ポインタ・参照型
    Address {
        kind: AddressKind,
        target: Arc<Type>,
    },
    /// 列挙型
    Enumeration {
        base: Option<Arc<Type>>,
        values: Vec<EnumerationValue>,
    },
    /// 添字範囲型
    Subrange {
        base: Option<Arc<Type>>,
        lower: i64,
        upper: i64,
    },
    /// 配列型（多次元可）
    Array {
        element: Arc<Type>,
        dimensions: Vec<ArrayDimension>,
    },
    /// 関数型
    Function,
    /// メンバポインタ型
    PointerToMember {
        target: Arc<Type>,
    },
    /// 不明な型
    Unspecified,
}

/// 型記述子
///
/// `kind()` は生成後に変わりません。ロケーション解決の入力を変更することは
/// ありません（常に新しい `ValueLocation` を返します）。
#[derive(Debug)]
pub struct Type {
    id: TypeId,
    name: String,
    byte_size: u64,
    variant: TypeVariant,
}

impl Type {
    /// 新しい型記述子を作成する
    pub fn new(id: TypeId, name: impl Into<String>, byte_size: u64, variant: TypeVariant) -> Self {
        Self {
            id,
            name: name.into(),
            byte_size,
            variant,
        }
    }

    /// 型IDを取得する
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// 型名を取得する
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 型のバイトサイズを取得する
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// 型のバリアントを取得する
    pub fn variant(&self) -> &TypeVariant {
        &self.variant
    }

    /// 型の種別を取得する
    pub fn kind(&self) -> TypeKind {
        match &self.variant {
            TypeVariant::Primitive { .. } => TypeKind::Primitive,
            TypeVariant::Compound { .. } => TypeKind::Compound,
            TypeVariant::Modified { .. } => TypeKind::Modified,
            TypeVariant::Typedef { .. } => TypeKind::Typedef,
            TypeVariant::Address { .. } => TypeKind::Address,
            TypeVariant::Enumeration { .. } => TypeKind::Enumeration,
            TypeVariant::Subrange { .. } => TypeKind::Subrange,
            TypeVariant::Array { .. } => TypeKind::Array,
            TypeVariant::Function => TypeKind::Function,
            TypeVariant::PointerToMember { .. } => TypeKind::PointerToMember,
            TypeVariant::Unspecified => TypeKind::Unspecified,
        }
    }

    /// typedef／修飾子の層を剥がした型を返す
    ///
    /// `next_only` が true の場合は1層だけ剥がします。剥がすものが無ければ
    /// 自身を返します。この操作は冪等です。
    pub fn resolve_raw_type(self: &Arc<Self>, next_only: bool) -> Arc<Type> {
        let mut current = Arc::clone(self);
        for _ in 0..MAX_STRIP_DEPTH {
            let next = match &current.variant {
                TypeVariant::Modified { inner, .. } => Arc::clone(inner),
                TypeVariant::Typedef { inner } => Arc::clone(inner),
                _ => return current,
            };
            if next_only {
                return next;
            }
            current = next;
        }
        current
    }

    /// 親ロケーションからこの型のオブジェクトのロケーションを解決する
    ///
    /// 入力は変更せず、常に新しいロケーションを返します。
    pub fn resolve_object_data_location(&self, parent: &ValueLocation) -> Result<ValueLocation> {
        let first = parent.piece_at(0).ok_or(Error::BadValue)?;

        // 複数ピースのロケーションはそのまま引き継ぐ（再構成できない）
        if parent.count_pieces() > 1 {
            return Ok(parent.clone());
        }

        match first.kind {
            PieceKind::Memory(address) => {
                Ok(ValueLocation::from_memory(address, self.byte_size))
            }
            // レジスタ常駐の値はピースをそのまま引き継ぐ
            PieceKind::Register(_) => Ok(parent.clone()),
            PieceKind::Invalid | PieceKind::Unknown => Err(Error::BadValue),
        }
    }

    /// 生のアドレスからこの型のオブジェクトのロケーションを解決する
    pub fn resolve_object_data_location_from_address(&self, address: u64) -> Result<ValueLocation> {
        if self.byte_size == 0 {
            return Err(Error::BadValue);
        }
        Ok(ValueLocation::from_memory(address, self.byte_size))
    }

    /// データメンバのロケーションを親ロケーションから解決する（複合型のみ）
    pub fn resolve_data_member_location(
        &self,
        member: &DataMember,
        parent: &ValueLocation,
    ) -> Result<ValueLocation> {
        if self.kind() != TypeKind::Compound {
            return Err(Error::BadValue);
        }
        Self::resolve_offset_location(parent, member.byte_offset, member.ty.byte_size())
    }

    /// 基底型のロケーションを親ロケーションから解決する（複合型のみ）
    pub fn resolve_base_type_location(
        &self,
        base: &BaseType,
        parent: &ValueLocation,
    ) -> Result<ValueLocation> {
        if self.kind() != TypeKind::Compound {
            return Err(Error::BadValue);
        }
        Self::resolve_offset_location(parent, base.byte_offset, base.ty.byte_size())
    }

    /// 配列要素のロケーションを添字パスから解決する（配列型のみ）
    ///
    /// 添字パスは外側の次元から順に、各次元の具体的な添字を与えます。
    pub fn resolve_element_location(
        &self,
        indices: &[i64],
        parent: &ValueLocation,
    ) -> Result<ValueLocation> {
        let (element, dimensions) = match &self.variant {
            TypeVariant::Array {
                element,
                dimensions,
            } => (element, dimensions),
            _ => return Err(Error::BadValue),
        };
        if indices.len() != dimensions.len() {
            return Err(Error::BadValue);
        }

        // 行優先で線形オフセットを計算する
        let mut linear: i64 = 0;
        for (i, &index) in indices.iter().enumerate() {
            let relative = index - dimensions[i].lower_bound();
            if relative < 0 {
                return Err(Error::BadValue);
            }
            let mut stride: i64 = 1;
            for inner in &dimensions[i + 1..] {
                // 内側の次元の要素数が不明だとオフセットを計算できない
                let count = inner.count().ok_or(Error::Unsupported)?;
                stride = stride
                    .checked_mul(count as i64)
                    .ok_or(Error::BadValue)?;
            }
            linear = linear
                .checked_add(relative.checked_mul(stride).ok_or(Error::BadValue)?)
                .ok_or(Error::BadValue)?;
        }

        let byte_offset = (linear as u64)
            .checked_mul(element.byte_size())
            .ok_or(Error::BadValue)?;
        Self::resolve_offset_location(parent, byte_offset, element.byte_size())
    }

    /// 親ロケーション先頭からのバイトオフセットで部分ロケーションを作る
    fn resolve_offset_location(
        parent: &ValueLocation,
        byte_offset: u64,
        byte_size: u64,
    ) -> Result<ValueLocation> {
        let first = parent.piece_at(0).ok_or(Error::BadValue)?;
        match first.kind {
            PieceKind::Memory(address) => {
                let target = address.checked_add(byte_offset).ok_or(Error::BadValue)?;
                Ok(ValueLocation::from_memory(target, byte_size))
            }
            // レジスタや分割ロケーション内のオフセット参照は未対応
            _ => Err(Error::Unsupported),
        }
    }
}

/// 型検索のフィルタ
///
/// `TypeInformation` コレボレータに渡す単純な条件の組です。
#[derive(Debug, Clone, Default)]
pub struct TypeLookupConstraints {
    /// 要求する型の種別
    pub type_kind: Option<TypeKind>,
    /// 内側の型（ポインタの指す先、配列要素など）の種別
    pub subtype_kind: Option<TypeKind>,
    /// 基底型の名前
    pub base_type_name: Option<String>,
}

impl TypeLookupConstraints {
    /// 種別のみを指定したフィルタを作成する
    pub fn of_kind(kind: TypeKind) -> Self {
        Self {
            type_kind: Some(kind),
            ..Default::default()
        }
    }

    /// 型がこのフィルタに一致するか判定する
    pub fn matches(&self, ty: &Type) -> bool {
        if let Some(kind) = self.type_kind {
            if ty.kind() != kind {
                return false;
            }
        }

        if let Some(sub) = self.subtype_kind {
            let inner = match ty.variant() {
                TypeVariant::Address { target, .. } => Some(target.kind()),
                TypeVariant::Array { element, .. } => Some(element.kind()),
                TypeVariant::Modified { inner, .. } => Some(inner.kind()),
                TypeVariant::Typedef { inner } => Some(inner.kind()),
                _ => None,
            };
            if inner != Some(sub) {
                return false;
            }
        }

        if let Some(name) = &self.base_type_name {
            let found = match ty.variant() {
                TypeVariant::Compound { base_types, .. } => {
                    base_types.iter().any(|base| &base.name == name)
                }
                TypeVariant::Enumeration { base: Some(base), .. } => base.name() == name,
                _ => false,
            };
            if !found {
                return false;
            }
        }

        true
    }
}
