//! 停止中フレームの変数列挙
//!
//! PCを含む関数DIEを探し、仮引数とローカル変数を宣言順に列挙します。
//! 各変数のロケーション式を評価して、値解決エンジンへ渡す `StackFrame`
//! を構築します。

use crate::loader::{DwarfLoader, DwarfSlice};
use crate::loc_eval::LocationEvaluator;
use crate::types::TypeBuilder;
use crate::Result;
use std::sync::Arc;
use tracing::debug;
use tsubaki_value::{PieceKind, StackFrame, Type, ValueLocation, ValuePiece, Variable};

type Unit = gimli::Unit<DwarfSlice>;
type Die<'abbrev, 'unit> = gimli::DebuggingInformationEntry<'abbrev, 'unit, DwarfSlice>;
type TreeNode<'abbrev, 'unit, 'tree> =
    gimli::EntriesTreeNode<'abbrev, 'unit, 'tree, DwarfSlice>;

/// RBP のDWARFレジスタ番号（System V AMD64 ABI）
const DW_REG_RBP: u16 = 6;

/// 標準的なx86-64プロローグにおける CFA と保存後RBPの距離
///
/// DW_AT_frame_base が DW_OP_call_frame_cfa の場合、CFI を評価する
/// 代わりに「RBP + 保存済みRBPとリターンアドレスぶん」の近似を使います。
const CFA_RBP_OFFSET: u64 = 16;

/// フレーム変数ロケーター
pub struct FrameVariableLocator<'a> {
    loader: &'a DwarfLoader,
    evaluator: LocationEvaluator,
    load_bias: u64,
}

impl<'a> FrameVariableLocator<'a> {
    /// フレーム変数ロケーターを作成する
    ///
    /// `load_bias` はPIEのロードバイアスです（非PIEなら 0）。
    pub fn new(loader: &'a DwarfLoader, load_bias: u64) -> Self {
        Self {
            loader,
            evaluator: LocationEvaluator::new(load_bias),
            load_bias,
        }
    }

    /// 実行時PCの位置のスタックフレームの変数一覧を構築する
    ///
    /// `get_register` はDWARFレジスタ番号の値を、`read_memory` はターゲット
    /// メモリを供給するコールバックです。個々の変数のロケーションが評価
    /// できなくても残りの変数は列挙され、失敗した変数は読み取り時に
    /// 失敗するロケーションを持ちます。
    pub fn stack_frame<F, G>(
        &self,
        pc: u64,
        mut get_register: F,
        mut read_memory: G,
    ) -> Result<StackFrame>
    where
        F: FnMut(u16) -> Result<u64>,
        G: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let static_pc = pc.checked_sub(self.load_bias).unwrap_or(pc);
        let dwarf = self.loader.dwarf();
        let builder = TypeBuilder::new(dwarf);

        let mut frame = StackFrame {
            pc,
            ..Default::default()
        };

        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            let Some(function_offset) = Self::find_function_at_pc(&unit, static_pc)? else {
                continue;
            };

            {
                let mut entries = unit.entries_at_offset(function_offset)?;
                if let Some((_, entry)) = entries.next_dfs()? {
                    frame.function_name = builder.die_name(&unit, entry)?;
                    frame.frame_base = self.resolve_frame_base(
                        &unit,
                        entry,
                        &mut get_register,
                        &mut read_memory,
                    );
                }
            }

            let mut tree = unit.entries_tree(Some(function_offset))?;
            let root = tree.root()?;
            self.collect_from_node(
                &unit,
                root,
                &builder,
                &mut frame,
                static_pc,
                &mut get_register,
                &mut read_memory,
            )?;
            break;
        }

        debug!(
            "frame at 0x{:x}: {} ({} parameters, {} locals)",
            pc,
            frame.function_name.as_deref().unwrap_or("?"),
            frame.parameters.len(),
            frame.locals.len()
        );
        Ok(frame)
    }

    /// PCを含む関数DIEを検索する
    fn find_function_at_pc(unit: &Unit, pc: u64) -> Result<Option<gimli::UnitOffset<usize>>> {
        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            if let Some((low, high)) = Self::function_range(entry)? {
                if pc >= low && pc < high {
                    return Ok(Some(entry.offset()));
                }
            }
        }
        Ok(None)
    }

    /// 関数DIEのアドレス範囲を取得する
    fn function_range(entry: &Die) -> Result<Option<(u64, u64)>> {
        let low = match entry.attr_value(gimli::DW_AT_low_pc)? {
            Some(gimli::AttributeValue::Addr(addr)) => addr,
            _ => return Ok(None),
        };
        let high = match entry.attr_value(gimli::DW_AT_high_pc)? {
            Some(gimli::AttributeValue::Addr(addr)) => addr,
            // high_pc は low_pc からのオフセットで格納されることが多い
            Some(gimli::AttributeValue::Udata(size)) => low + size,
            _ => return Ok(None),
        };
        Ok(Some((low, high)))
    }

    /// 関数のフレームベースアドレスを解決する
    fn resolve_frame_base<F, G>(
        &self,
        unit: &Unit,
        entry: &Die,
        get_register: &mut F,
        read_memory: &mut G,
    ) -> Option<u64>
    where
        F: FnMut(u16) -> Result<u64>,
        G: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let expression = match entry.attr_value(gimli::DW_AT_frame_base) {
            Ok(Some(gimli::AttributeValue::Exprloc(expression))) => expression,
            _ => return None,
        };

        match self.evaluator.evaluate(
            expression,
            unit.encoding(),
            None,
            8,
            get_register,
            read_memory,
        ) {
            Ok(location) => match location.piece_at(0).map(|piece| piece.kind) {
                Some(PieceKind::Register(index)) => get_register(index).ok(),
                Some(PieceKind::Memory(address)) => Some(address),
                _ => None,
            },
            // DW_OP_call_frame_cfa はCFIの評価が必要。標準プロローグの
            // 近似にフォールバックする
            Err(err) => {
                debug!("frame base expression failed ({}), falling back to rbp", err);
                get_register(DW_REG_RBP).ok().map(|rbp| rbp + CFA_RBP_OFFSET)
            }
        }
    }

    /// 関数DIE配下から変数を収集する（レキシカルブロックは再帰する）
    #[allow(clippy::too_many_arguments)]
    fn collect_from_node<F, G>(
        &self,
        unit: &Unit,
        node: TreeNode<'_, '_, '_>,
        builder: &TypeBuilder,
        frame: &mut StackFrame,
        static_pc: u64,
        get_register: &mut F,
        read_memory: &mut G,
    ) -> Result<()>
    where
        F: FnMut(u16) -> Result<u64>,
        G: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let frame_base = frame.frame_base;
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let is_parameter = match child.entry().tag() {
                gimli::DW_TAG_formal_parameter => true,
                gimli::DW_TAG_variable => false,
                gimli::DW_TAG_lexical_block => {
                    self.collect_from_node(
                        unit,
                        child,
                        builder,
                        frame,
                        static_pc,
                        get_register,
                        read_memory,
                    )?;
                    continue;
                }
                _ => continue,
            };

            let Some(variable) = self.extract_variable(
                unit,
                child.entry(),
                builder,
                frame_base,
                static_pc,
                get_register,
                read_memory,
            )?
            else {
                continue;
            };

            if is_parameter {
                frame.parameters.push(variable);
            } else {
                frame.locals.push(variable);
            }
        }
        Ok(())
    }

    /// 1つの変数DIEから変数記述子を作る
    #[allow(clippy::too_many_arguments)]
    fn extract_variable<F, G>(
        &self,
        unit: &Unit,
        entry: &Die,
        builder: &TypeBuilder,
        frame_base: Option<u64>,
        static_pc: u64,
        get_register: &mut F,
        read_memory: &mut G,
    ) -> Result<Option<Variable>>
    where
        F: FnMut(u16) -> Result<u64>,
        G: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        // 無名の変数（コンパイラ生成の一時など）は飛ばす
        let Some(name) = builder.die_name(unit, entry)? else {
            return Ok(None);
        };
        let ty = match entry.attr_value(gimli::DW_AT_type)? {
            Some(gimli::AttributeValue::UnitRef(offset)) => builder.build(unit, offset)?,
            _ => return Ok(None),
        };

        let location = match self.resolve_variable_location(
            unit,
            entry,
            &ty,
            frame_base,
            static_pc,
            get_register,
            read_memory,
        ) {
            Ok(location) => location,
            // 1変数の失敗で残りを巻き込まない。読み取り時に失敗する
            // ロケーションを与えて列挙は続ける
            Err(err) => {
                debug!("location of '{}' unavailable: {}", name, err);
                unknown_location(ty.byte_size())
            }
        };

        Ok(Some(Variable::new(name, ty, Arc::new(location))))
    }

    /// 変数のロケーション式を評価する
    #[allow(clippy::too_many_arguments)]
    fn resolve_variable_location<F, G>(
        &self,
        unit: &Unit,
        entry: &Die,
        ty: &Arc<Type>,
        frame_base: Option<u64>,
        static_pc: u64,
        get_register: &mut F,
        read_memory: &mut G,
    ) -> Result<ValueLocation>
    where
        F: FnMut(u16) -> Result<u64>,
        G: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        let attr = entry
            .attr_value(gimli::DW_AT_location)?
            .ok_or_else(|| anyhow::anyhow!("no location (optimized out)"))?;

        if let gimli::AttributeValue::Exprloc(expression) = attr {
            return self.evaluator.evaluate(
                expression,
                unit.encoding(),
                frame_base,
                ty.byte_size(),
                get_register,
                read_memory,
            );
        }

        // ロケーションリスト: PCを含むエントリの式を評価する
        if let Some(mut locations) = self.loader.dwarf().attr_locations(unit, attr)? {
            while let Some(location_entry) = locations.next()? {
                if static_pc >= location_entry.range.begin && static_pc < location_entry.range.end
                {
                    return self.evaluator.evaluate(
                        location_entry.data,
                        unit.encoding(),
                        frame_base,
                        ty.byte_size(),
                        get_register,
                        read_memory,
                    );
                }
            }
            return Err(anyhow::anyhow!(
                "no location list entry covers pc 0x{:x}",
                static_pc
            ));
        }

        Err(anyhow::anyhow!("unsupported location attribute"))
    }
}

/// 解決できなかった変数に与える、読み取りで「見つからない」になる
/// ロケーション
fn unknown_location(byte_size: u64) -> ValueLocation {
    ValueLocation::from_pieces(vec![ValuePiece {
        kind: PieceKind::Unknown,
        bit_offset: 0,
        bit_size: byte_size * 8,
        size: byte_size,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_location_is_unreadable() {
        let location = unknown_location(4);
        assert_eq!(location.count_pieces(), 1);
        assert_eq!(location.piece_at(0).unwrap().kind, PieceKind::Unknown);
        assert!(!location.is_writable());
    }
}
