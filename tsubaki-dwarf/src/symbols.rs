//! シンボル解決

use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol};
use std::collections::HashMap;

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前を取得する（デマングルできなければマングル名のまま）
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// シンボル名をデマングルする
///
/// Rustのシンボルのみ対応します。マングル名に見えない文字列はそのまま
/// 返します。
fn demangle_symbol(name: &str) -> String {
    match rustc_demangle::try_demangle(name) {
        Ok(demangled) => format!("{:#}", demangled),
        Err(_) => name.to_string(),
    }
}

/// シンボル解決
pub struct SymbolResolver {
    /// シンボル名 -> シンボル情報のマップ
    symbols_by_name: HashMap<String, Symbol>,
    /// アドレス順にソート済みのシンボル列（逆引き用）
    symbols_by_address: Vec<Symbol>,
    is_pie: bool,
}

impl SymbolResolver {
    /// DWARFローダーのシンボルテーブルから解決器を構築する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let mut symbols = Vec::new();
        for symbol in loader.object_file().symbols() {
            if let Ok(name) = symbol.name() {
                if !name.is_empty() {
                    symbols.push(Symbol::new(name.to_string(), symbol.address(), symbol.size()));
                }
            }
        }
        Ok(Self::from_symbols(symbols, loader.is_pie()))
    }

    /// シンボル列から解決器を構築する
    pub fn from_symbols(symbols: Vec<Symbol>, is_pie: bool) -> Self {
        let mut symbols_by_name = HashMap::new();
        let mut symbols_by_address = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            symbols_by_name.insert(symbol.name.clone(), symbol.clone());
            symbols_by_address.push(symbol);
        }
        symbols_by_address.sort_by_key(|s| s.address);

        Self {
            symbols_by_name,
            symbols_by_address,
            is_pie,
        }
    }

    /// PIEかどうかを取得する
    pub fn is_pie(&self) -> bool {
        self.is_pie
    }

    /// シンボル名からアドレスを解決する
    pub fn resolve(&self, symbol: &str) -> Option<u64> {
        self.symbols_by_name.get(symbol).map(|s| s.address)
    }

    /// アドレスからシンボルを逆引きする（最も近い手前のシンボル）
    pub fn reverse_resolve(&self, addr: u64) -> Option<Symbol> {
        match self
            .symbols_by_address
            .binary_search_by_key(&addr, |s| s.address)
        {
            Ok(idx) => Some(self.symbols_by_address[idx].clone()),
            Err(idx) => {
                if idx == 0 {
                    return None;
                }
                let sym = &self.symbols_by_address[idx - 1];
                // サイズ情報があれば範囲内かチェックする
                if sym.size > 0 && addr >= sym.address + sym.size {
                    return None;
                }
                Some(sym.clone())
            }
        }
    }

    /// すべてのシンボルを取得する
    pub fn all_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols_by_address.iter()
    }

    /// パターンを含むシンボルを検索する
    ///
    /// マングル名とデマングル名の両方を対象にします。
    pub fn find_symbols(&self, pattern: &str) -> Vec<Symbol> {
        self.symbols_by_name
            .values()
            .filter(|s| s.name.contains(pattern) || s.demangled_name.contains(pattern))
            .cloned()
            .collect()
    }
}
