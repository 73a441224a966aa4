//! DWARF型DIEから型記述子を構築する
//!
//! 型DIEを再帰的にたどって `tsubaki_value::Type` のイミュータブルな
//! 記述子に変換します。型IDには `.debug_info` 内のグローバルオフセットを
//! 使い、同じDIEは1度だけ構築してキャッシュから共有します。

use crate::loader::{DwarfLoader, DwarfSlice};
use crate::Result;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use tsubaki_value::{
    AddressKind, ArrayDimension, BaseType, CompoundKind, DataMember, EnumerationValue, Modifiers,
    Type, TypeId, TypeLookupConstraints, TypeVariant, ValueType,
};

type Unit = gimli::Unit<DwarfSlice>;
type UnitOffset = gimli::UnitOffset<usize>;
type Die<'abbrev, 'unit> = gimli::DebuggingInformationEntry<'abbrev, 'unit, DwarfSlice>;

/// DWARFのエンコーディングとバイトサイズから値の型コードを決める
pub(crate) fn value_type_for(encoding: gimli::DwAte, byte_size: u64) -> ValueType {
    match encoding {
        gimli::DW_ATE_boolean => ValueType::Bool,
        gimli::DW_ATE_float => {
            if byte_size == 4 {
                ValueType::Float32
            } else {
                ValueType::Float64
            }
        }
        gimli::DW_ATE_signed | gimli::DW_ATE_signed_char => match byte_size {
            1 => ValueType::Int8,
            2 => ValueType::Int16,
            8 => ValueType::Int64,
            _ => ValueType::Int32,
        },
        gimli::DW_ATE_unsigned | gimli::DW_ATE_unsigned_char | gimli::DW_ATE_UTF => {
            match byte_size {
                1 => ValueType::UInt8,
                2 => ValueType::UInt16,
                8 => ValueType::UInt64,
                _ => ValueType::UInt32,
            }
        }
        _ => ValueType::signed_of_byte_size(byte_size),
    }
}

/// 型記述子ビルダー
pub struct TypeBuilder<'a> {
    dwarf: &'a gimli::Dwarf<DwarfSlice>,
    cache: RefCell<HashMap<TypeId, Arc<Type>>>,
    in_progress: RefCell<HashSet<TypeId>>,
}

impl<'a> TypeBuilder<'a> {
    /// 新しいビルダーを作成する
    pub fn new(dwarf: &'a gimli::Dwarf<DwarfSlice>) -> Self {
        Self {
            dwarf,
            cache: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    /// 型DIEから型記述子を構築する
    pub fn build(&self, unit: &Unit, offset: UnitOffset) -> Result<Arc<Type>> {
        let id = Self::type_id(unit, offset);
        if let Some(cached) = self.cache.borrow().get(&id) {
            return Ok(Arc::clone(cached));
        }

        // 自己参照（自分を指すポインタを持つ構造体など）は、構築中の型へ
        // 再帰した時点で中身なしのスタブに打ち切る
        if self.in_progress.borrow().contains(&id) {
            return self.build_stub(unit, offset, id);
        }

        self.in_progress.borrow_mut().insert(id);
        let result = self.build_uncached(unit, offset, id);
        self.in_progress.borrow_mut().remove(&id);

        let ty = result?;
        self.cache
            .borrow_mut()
            .insert(id, Arc::clone(&ty));
        Ok(ty)
    }

    fn build_uncached(&self, unit: &Unit, offset: UnitOffset, id: TypeId) -> Result<Arc<Type>> {
        let mut entries = unit.entries_at_offset(offset)?;
        let entry = match entries.next_dfs()? {
            Some((_, entry)) => entry.clone(),
            None => {
                return Ok(Arc::new(Type::new(
                    id,
                    "<unknown>",
                    0,
                    TypeVariant::Unspecified,
                )))
            }
        };

        match entry.tag() {
            gimli::DW_TAG_base_type => self.build_base_type(unit, &entry, id),
            gimli::DW_TAG_pointer_type => {
                self.build_address_type(unit, &entry, id, AddressKind::Pointer)
            }
            gimli::DW_TAG_reference_type | gimli::DW_TAG_rvalue_reference_type => {
                self.build_address_type(unit, &entry, id, AddressKind::Reference)
            }
            gimli::DW_TAG_array_type => self.build_array_type(unit, &entry, id),
            gimli::DW_TAG_structure_type => {
                self.build_compound_type(unit, &entry, id, CompoundKind::Struct)
            }
            gimli::DW_TAG_class_type => {
                self.build_compound_type(unit, &entry, id, CompoundKind::Class)
            }
            gimli::DW_TAG_union_type => {
                self.build_compound_type(unit, &entry, id, CompoundKind::Union)
            }
            gimli::DW_TAG_enumeration_type => self.build_enumeration_type(unit, &entry, id),
            gimli::DW_TAG_typedef => self.build_typedef(unit, &entry, id),
            gimli::DW_TAG_const_type => self.build_modified(
                unit,
                &entry,
                id,
                Modifiers {
                    is_const: true,
                    is_volatile: false,
                },
            ),
            gimli::DW_TAG_volatile_type => self.build_modified(
                unit,
                &entry,
                id,
                Modifiers {
                    is_const: false,
                    is_volatile: true,
                },
            ),
            gimli::DW_TAG_subroutine_type => {
                let name = self
                    .die_name(unit, &entry)?
                    .unwrap_or_else(|| "<function>".to_string());
                Ok(Arc::new(Type::new(id, name, 0, TypeVariant::Function)))
            }
            gimli::DW_TAG_ptr_to_member_type => {
                let target = self
                    .build_referenced(unit, &entry)?
                    .unwrap_or_else(void_type);
                let name = format!("{} member pointer", target.name());
                let byte_size = Self::byte_size(&entry).unwrap_or(8);
                Ok(Arc::new(Type::new(
                    id,
                    name,
                    byte_size,
                    TypeVariant::PointerToMember { target },
                )))
            }
            tag => {
                debug!("unhandled type DIE {} treated as unspecified", tag);
                let name = self
                    .die_name(unit, &entry)?
                    .unwrap_or_else(|| "<unknown>".to_string());
                let byte_size = Self::byte_size(&entry).unwrap_or(0);
                Ok(Arc::new(Type::new(
                    id,
                    name,
                    byte_size,
                    TypeVariant::Unspecified,
                )))
            }
        }
    }

    /// 再帰を打ち切るためのスタブ型を構築する
    ///
    /// 複合型は空の複合型として返し、ポインタ経由の参照先でも子ノードを
    /// 作れるようにします。
    fn build_stub(&self, unit: &Unit, offset: UnitOffset, id: TypeId) -> Result<Arc<Type>> {
        let mut entries = unit.entries_at_offset(offset)?;
        if let Some((_, entry)) = entries.next_dfs()? {
            let name = self
                .die_name(unit, entry)?
                .unwrap_or_else(|| "<recursive>".to_string());
            let byte_size = Self::byte_size(entry).unwrap_or(0);
            let variant = match entry.tag() {
                gimli::DW_TAG_structure_type
                | gimli::DW_TAG_class_type
                | gimli::DW_TAG_union_type => TypeVariant::Compound {
                    kind: CompoundKind::Struct,
                    base_types: Vec::new(),
                    members: Vec::new(),
                },
                _ => TypeVariant::Unspecified,
            };
            return Ok(Arc::new(Type::new(id, name, byte_size, variant)));
        }
        Ok(Arc::new(Type::new(
            id,
            "<recursive>",
            0,
            TypeVariant::Unspecified,
        )))
    }

    fn build_base_type(&self, unit: &Unit, entry: &Die, id: TypeId) -> Result<Arc<Type>> {
        let name = self
            .die_name(unit, entry)?
            .unwrap_or_else(|| "<unnamed>".to_string());
        let byte_size = Self::byte_size(entry).unwrap_or(0);
        let encoding = match entry.attr_value(gimli::DW_AT_encoding)? {
            Some(gimli::AttributeValue::Encoding(encoding)) => encoding,
            _ => gimli::DW_ATE_signed,
        };

        Ok(Arc::new(Type::new(
            id,
            name,
            byte_size,
            TypeVariant::Primitive {
                value_type: value_type_for(encoding, byte_size),
            },
        )))
    }

    fn build_address_type(
        &self,
        unit: &Unit,
        entry: &Die,
        id: TypeId,
        kind: AddressKind,
    ) -> Result<Arc<Type>> {
        // 指す先が省略されたポインタ（void* など）
        let target = self
            .build_referenced(unit, entry)?
            .unwrap_or_else(void_type);

        let name = match self.die_name(unit, entry)? {
            Some(name) => name,
            None => {
                let suffix = match kind {
                    AddressKind::Pointer => "*",
                    AddressKind::Reference => "&",
                };
                format!("{}{}", target.name(), suffix)
            }
        };
        let byte_size = Self::byte_size(entry).unwrap_or(8);

        Ok(Arc::new(Type::new(
            id,
            name,
            byte_size,
            TypeVariant::Address { kind, target },
        )))
    }

    fn build_array_type(&self, unit: &Unit, entry: &Die, id: TypeId) -> Result<Arc<Type>> {
        let element = self
            .build_referenced(unit, entry)?
            .unwrap_or_else(void_type);

        // 次元は DW_TAG_subrange_type の子から（宣言順）
        let mut dimensions = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            if child.entry().tag() != gimli::DW_TAG_subrange_type {
                continue;
            }
            dimensions.push(ArrayDimension {
                bounds: Self::subrange_bounds(child.entry())?,
            });
        }
        if dimensions.is_empty() {
            dimensions.push(ArrayDimension { bounds: None });
        }

        let byte_size = match Self::byte_size(entry) {
            Some(size) => size,
            None => {
                // 全次元の要素数が分かれば計算する
                let mut total = element.byte_size();
                for dimension in &dimensions {
                    match dimension.count() {
                        Some(count) => total *= count,
                        None => {
                            total = 0;
                            break;
                        }
                    }
                }
                total
            }
        };

        let name = match self.die_name(unit, entry)? {
            Some(name) => name,
            None => {
                let mut name = element.name().to_string();
                for dimension in &dimensions {
                    match dimension.count() {
                        Some(count) => name.push_str(&format!("[{}]", count)),
                        None => name.push_str("[]"),
                    }
                }
                name
            }
        };

        Ok(Arc::new(Type::new(
            id,
            name,
            byte_size,
            TypeVariant::Array {
                element,
                dimensions,
            },
        )))
    }

    fn build_compound_type(
        &self,
        unit: &Unit,
        entry: &Die,
        id: TypeId,
        kind: CompoundKind,
    ) -> Result<Arc<Type>> {
        let name = self
            .die_name(unit, entry)?
            .unwrap_or_else(|| "<anonymous>".to_string());
        let byte_size = Self::byte_size(entry).unwrap_or(0);

        let mut base_types = Vec::new();
        let mut members = Vec::new();

        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let child_entry = child.entry();
            match child_entry.tag() {
                gimli::DW_TAG_member => {
                    let member_name = self
                        .die_name(unit, child_entry)?
                        .unwrap_or_else(|| "<unnamed>".to_string());
                    let Some(ty) = self.build_referenced(unit, child_entry)? else {
                        continue;
                    };
                    let byte_offset = Self::data_member_location(child_entry).unwrap_or(0);
                    members.push(DataMember {
                        name: member_name,
                        ty,
                        byte_offset,
                    });
                }
                gimli::DW_TAG_inheritance => {
                    let Some(ty) = self.build_referenced(unit, child_entry)? else {
                        continue;
                    };
                    let byte_offset = Self::data_member_location(child_entry).unwrap_or(0);
                    base_types.push(BaseType {
                        name: ty.name().to_string(),
                        ty,
                        byte_offset,
                    });
                }
                _ => {}
            }
        }

        Ok(Arc::new(Type::new(
            id,
            name,
            byte_size,
            TypeVariant::Compound {
                kind,
                base_types,
                members,
            },
        )))
    }

    fn build_enumeration_type(&self, unit: &Unit, entry: &Die, id: TypeId) -> Result<Arc<Type>> {
        let name = self
            .die_name(unit, entry)?
            .unwrap_or_else(|| "<anonymous>".to_string());
        let base = self.build_referenced(unit, entry)?;
        let byte_size = Self::byte_size(entry)
            .or_else(|| base.as_ref().map(|base| base.byte_size()))
            .unwrap_or(0);

        let mut values = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let child_entry = child.entry();
            if child_entry.tag() != gimli::DW_TAG_enumerator {
                continue;
            }
            let Some(enumerator_name) = self.die_name(unit, child_entry)? else {
                continue;
            };
            let value = match child_entry.attr_value(gimli::DW_AT_const_value)? {
                Some(gimli::AttributeValue::Sdata(value)) => value,
                Some(attr) => match attr.udata_value() {
                    Some(value) => value as i64,
                    None => continue,
                },
                None => continue,
            };
            values.push(EnumerationValue {
                name: enumerator_name,
                value,
            });
        }

        Ok(Arc::new(Type::new(
            id,
            name,
            byte_size,
            TypeVariant::Enumeration { base, values },
        )))
    }

    fn build_typedef(&self, unit: &Unit, entry: &Die, id: TypeId) -> Result<Arc<Type>> {
        let inner = self
            .build_referenced(unit, entry)?
            .unwrap_or_else(void_type);
        let name = self
            .die_name(unit, entry)?
            .unwrap_or_else(|| inner.name().to_string());
        let byte_size = Self::byte_size(entry).unwrap_or_else(|| inner.byte_size());

        Ok(Arc::new(Type::new(
            id,
            name,
            byte_size,
            TypeVariant::Typedef { inner },
        )))
    }

    fn build_modified(
        &self,
        unit: &Unit,
        entry: &Die,
        id: TypeId,
        modifiers: Modifiers,
    ) -> Result<Arc<Type>> {
        let inner = self
            .build_referenced(unit, entry)?
            .unwrap_or_else(void_type);
        let qualifier = if modifiers.is_const { "const" } else { "volatile" };
        let name = format!("{} {}", qualifier, inner.name());
        let byte_size = Self::byte_size(entry).unwrap_or_else(|| inner.byte_size());

        Ok(Arc::new(Type::new(
            id,
            name,
            byte_size,
            TypeVariant::Modified { modifiers, inner },
        )))
    }

    /// DW_AT_type が参照する型を構築する
    fn build_referenced(&self, unit: &Unit, entry: &Die) -> Result<Option<Arc<Type>>> {
        match entry.attr_value(gimli::DW_AT_type)? {
            Some(gimli::AttributeValue::UnitRef(offset)) => Ok(Some(self.build(unit, offset)?)),
            Some(other) => {
                debug!("unsupported cross-unit type reference: {:?}", other);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// DIEの名前を取得する（.debug_str 参照も解決する）
    pub(crate) fn die_name(&self, unit: &Unit, entry: &Die) -> Result<Option<String>> {
        let attr = match entry.attr_value(gimli::DW_AT_name)? {
            Some(attr) => attr,
            None => return Ok(None),
        };
        let name = match self.dwarf.attr_string(unit, attr) {
            Ok(name) => name,
            Err(_) => return Ok(None),
        };
        Ok(Some(name.to_string_lossy().into_owned()))
    }

    fn byte_size(entry: &Die) -> Option<u64> {
        entry
            .attr_value(gimli::DW_AT_byte_size)
            .ok()
            .flatten()
            .and_then(|attr| attr.udata_value())
    }

    fn data_member_location(entry: &Die) -> Option<u64> {
        entry
            .attr_value(gimli::DW_AT_data_member_location)
            .ok()
            .flatten()
            .and_then(|attr| attr.udata_value())
    }

    /// 添字範囲の上下限を取得する
    fn subrange_bounds(entry: &Die) -> Result<Option<(i64, i64)>> {
        let lower = match entry.attr_value(gimli::DW_AT_lower_bound)? {
            Some(gimli::AttributeValue::Sdata(value)) => value,
            Some(attr) => attr.udata_value().map(|v| v as i64).unwrap_or(0),
            None => 0,
        };

        if let Some(attr) = entry.attr_value(gimli::DW_AT_count)? {
            if let Some(count) = attr.udata_value() {
                if count == 0 {
                    return Ok(None);
                }
                return Ok(Some((lower, lower + count as i64 - 1)));
            }
        }

        match entry.attr_value(gimli::DW_AT_upper_bound)? {
            Some(gimli::AttributeValue::Sdata(upper)) => Ok(Some((lower, upper))),
            Some(attr) => Ok(attr.udata_value().map(|upper| (lower, upper as i64))),
            None => Ok(None),
        }
    }

    /// DIEの `.debug_info` 内グローバルオフセットを型IDとして使う
    fn type_id(unit: &Unit, offset: UnitOffset) -> TypeId {
        offset
            .to_debug_info_offset(&unit.header)
            .map(|global| global.0 as u64)
            .unwrap_or(offset.0 as u64)
    }
}

/// 指す先が不明なポインタ等に与える void 型
fn void_type() -> Arc<Type> {
    Arc::new(Type::new(0, "void", 0, TypeVariant::Unspecified))
}

/// 名前付き型カタログ
///
/// 構築時に全コンパイルユニットを走査し、名前を持つ型DIEをすべて記述子に
/// 変換して名前で索引します。`TypeInformation` コレボレータの実装です。
pub struct TypeCatalog {
    types_by_name: HashMap<String, Vec<Arc<Type>>>,
}

/// 名前索引の対象にする型DIEのタグか
fn is_named_type_tag(tag: gimli::DwTag) -> bool {
    matches!(
        tag,
        gimli::DW_TAG_base_type
            | gimli::DW_TAG_structure_type
            | gimli::DW_TAG_class_type
            | gimli::DW_TAG_union_type
            | gimli::DW_TAG_enumeration_type
            | gimli::DW_TAG_typedef
    )
}

impl TypeCatalog {
    /// DWARF情報から型カタログを構築する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let dwarf = loader.dwarf();
        let builder = TypeBuilder::new(dwarf);
        let mut types_by_name: HashMap<String, Vec<Arc<Type>>> = HashMap::new();

        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            let mut entries = unit.entries();
            while let Some((_, entry)) = entries.next_dfs()? {
                if !is_named_type_tag(entry.tag()) {
                    continue;
                }
                let offset = entry.offset();
                let Some(name) = builder.die_name(&unit, entry)? else {
                    continue;
                };
                match builder.build(&unit, offset) {
                    Ok(ty) => {
                        let slot = types_by_name.entry(name).or_default();
                        if !slot.iter().any(|existing| existing.id() == ty.id()) {
                            slot.push(ty);
                        }
                    }
                    Err(err) => debug!("failed to build type '{}': {}", name, err),
                }
            }
        }

        debug!("type catalog built with {} names", types_by_name.len());
        Ok(Self { types_by_name })
    }

    /// 型の列からカタログを構築する
    pub fn from_types(types: Vec<Arc<Type>>) -> Self {
        let mut types_by_name: HashMap<String, Vec<Arc<Type>>> = HashMap::new();
        for ty in types {
            types_by_name
                .entry(ty.name().to_string())
                .or_default()
                .push(ty);
        }
        Self { types_by_name }
    }

    /// 索引された名前の数を取得する
    pub fn count_names(&self) -> usize {
        self.types_by_name.len()
    }
}

impl tsubaki_value::TypeInformation for TypeCatalog {
    fn lookup_type_by_name(
        &self,
        name: &str,
        constraints: &TypeLookupConstraints,
    ) -> tsubaki_value::Result<Arc<Type>> {
        let candidates = self
            .types_by_name
            .get(name)
            .ok_or(tsubaki_value::Error::EntryNotFound)?;
        candidates
            .iter()
            .find(|ty| constraints.matches(ty))
            .map(Arc::clone)
            .ok_or(tsubaki_value::Error::EntryNotFound)
    }
}
