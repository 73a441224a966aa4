//! デバッガ本体
//!
//! ターゲットプロセス制御・DWARF情報・値解決エンジンを束ねるファサード
//! です。停止するたびにスタックフレームを読み直し、値ノードツリーを
//! 作り直します。

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{debug, info};
use tsubaki_dwarf::{
    DwarfLoader, FrameVariableLocator, LineInfoProvider, Symbol, SymbolResolver, TypeCatalog,
};
use tsubaki_node::{
    ChildId, TypeHandlerRoster, ValueNodeContainer, ValueNodeManager, ValueResolver,
};
use tsubaki_target::{Amd64, Process, ProcessMemory, Registers, StopReason};
use tsubaki_value::{Architecture, CpuState, ValueLoader};

use crate::breakpoint::{BreakpointId, BreakpointManager};

/// `vars` コマンドで展開する深さ
const VARS_DEPTH: usize = 1;

/// `print` コマンドで展開する深さ
const PRINT_DEPTH: usize = 4;

/// デバッガ
pub struct Debugger {
    process: Option<Process>,
    memory: Option<Arc<ProcessMemory>>,
    registers: Option<Registers>,
    dwarf_loader: Option<DwarfLoader>,
    symbol_resolver: Option<SymbolResolver>,
    line_info: Option<LineInfoProvider>,
    type_catalog: Option<Arc<TypeCatalog>>,
    /// PIEのロードバイアス（初回停止時に確定する）
    load_bias: Option<u64>,
    breakpoints: BreakpointManager,
    node_manager: ValueNodeManager,
    resolver: ValueResolver,
    /// 現在の停止点に対する値ローダー
    loader: Option<ValueLoader>,
}

impl Debugger {
    /// デバッガを作成する
    pub fn new() -> Result<Self> {
        Ok(Self {
            process: None,
            memory: None,
            registers: None,
            dwarf_loader: None,
            symbol_resolver: None,
            line_info: None,
            type_catalog: None,
            load_bias: None,
            breakpoints: BreakpointManager::new(),
            node_manager: ValueNodeManager::new(Arc::new(
                TypeHandlerRoster::with_default_handlers(),
            )),
            resolver: ValueResolver::new()?,
            loader: None,
        })
    }

    /// バイナリのデバッグ情報を読み込む
    pub fn load_binary(&mut self, path: &str) -> Result<()> {
        let loader =
            DwarfLoader::load(path).with_context(|| format!("failed to load binary: {}", path))?;
        let symbols = SymbolResolver::new(&loader)?;
        let lines = LineInfoProvider::new(&loader)?;
        let catalog = Arc::new(TypeCatalog::new(&loader)?);

        info!(
            "loaded {} ({} symbols, {} type names)",
            path,
            symbols.all_symbols().count(),
            catalog.count_names()
        );

        self.symbol_resolver = Some(symbols);
        self.line_info = Some(lines);
        self.type_catalog = Some(catalog);
        self.dwarf_loader = Some(loader);
        Ok(())
    }

    /// バイナリを起動してトレースを開始する
    pub fn spawn(&mut self, program: &str, args: &[String]) -> Result<()> {
        let process = Process::spawn(program, args)?;
        let pid = process.pid();
        self.memory = Some(Arc::new(ProcessMemory::new(pid)));
        self.registers = Some(Registers::new(pid));
        self.process = Some(process);
        self.load_bias = None;
        info!("spawned {} (pid {})", program, pid);
        Ok(())
    }

    /// 実行中のプロセスにアタッチする
    pub fn attach(&mut self, pid: i32) -> Result<()> {
        let process = Process::attach(pid)?;
        self.memory = Some(Arc::new(ProcessMemory::new(pid)));
        self.registers = Some(Registers::new(pid));
        self.process = Some(process);
        self.load_bias = None;
        info!("attached to pid {}", pid);
        Ok(())
    }

    /// 実行時アドレスにブレークポイントを設定する
    pub fn set_breakpoint(&mut self, address: u64) -> Result<BreakpointId> {
        let memory = self.require_memory()?.clone();
        let id = self.breakpoints.add_and_enable(address, &memory)?;
        info!("breakpoint {} set at 0x{:x}", id, address);
        Ok(id)
    }

    /// シンボル名にブレークポイントを設定する
    pub fn set_breakpoint_by_symbol(&mut self, name: &str) -> Result<(BreakpointId, u64)> {
        let static_address = self
            .require_symbols()?
            .resolve(name)
            .ok_or_else(|| anyhow!("symbol not found: {}", name))?;
        let address = static_address + self.ensure_load_bias()?;
        let id = self.set_breakpoint(address)?;
        Ok((id, address))
    }

    /// ブレークポイントを削除する
    ///
    /// 削除したブレークポイントのアドレスを返します。
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<u64> {
        let address = self
            .breakpoints
            .get(id)
            .ok_or_else(|| anyhow!("no breakpoint with id {}", id))?
            .address;
        let memory = self.require_memory()?.clone();
        self.breakpoints.remove_and_disable(id, &memory)?;
        info!("breakpoint {} removed from 0x{:x}", id, address);
        Ok(address)
    }

    /// ブレークポイント一覧を表示する
    pub fn show_breakpoints(&self) {
        if self.breakpoints.count() == 0 {
            println!("no breakpoints");
            return;
        }
        for breakpoint in self.breakpoints.all() {
            println!(
                "{}: 0x{:x} ({})",
                breakpoint.id,
                breakpoint.address,
                if breakpoint.enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
        }
    }

    /// 実行を再開して次の停止を待つ
    pub fn continue_and_wait(&mut self) -> Result<StopReason> {
        // 現在のPCがブレークポイント上なら、元の命令で1歩進めてから再開する
        self.step_over_breakpoint()?;

        let reason = self.require_process()?.continue_and_wait()?;
        match reason {
            StopReason::Breakpoint => self.rewind_to_breakpoint()?,
            StopReason::Exited(_) => self.clear_target(),
            _ => {}
        }
        Ok(reason)
    }

    /// 1命令ステップ実行する
    pub fn step(&mut self) -> Result<StopReason> {
        let pc = self.require_registers()?.pc()?;
        let reason = if let Some(id) = self.breakpoints.find_by_address(pc) {
            let memory = self.require_memory()?.clone();
            self.breakpoints.disable(id, &memory)?;
            let reason = self.require_process()?.step()?;
            self.breakpoints.enable(id, &memory)?;
            reason
        } else {
            self.require_process()?.step()?
        };

        if matches!(reason, StopReason::Exited(_)) {
            self.clear_target();
        }
        Ok(reason)
    }

    /// 停止位置のスタックフレームを読み直し、値ノードツリーを作り直す
    ///
    /// 関数名を返します（DWARFから特定できなければ None）。
    pub fn refresh_frame(&mut self) -> Result<Option<String>> {
        let load_bias = self.ensure_load_bias()?;
        let memory = self.require_memory()?.clone();
        let registers = self.require_registers()?;
        let pc = registers.pc()?;
        let cpu = Arc::new(registers.snapshot()?);
        let catalog = self.require_catalog()?.clone();
        let dwarf = self.require_dwarf()?;

        let arch = Amd64;
        let locator = FrameVariableLocator::new(dwarf, load_bias);
        let frame = locator.stack_frame(
            pc,
            |index| {
                let register = arch
                    .register_by_index(index)
                    .ok_or_else(|| anyhow!("unknown DWARF register {}", index))?;
                cpu.register_value(register)
                    .ok_or_else(|| anyhow!("register {} unavailable", register.name))
            },
            |address, size| memory.read(address, size),
        )?;

        let loader = ValueLoader::new(Arc::new(Amd64), memory, cpu, catalog);
        self.node_manager.set_stack_frame(Some(&frame), &loader)?;
        self.loader = Some(loader);
        Ok(frame.function_name)
    }

    /// 現在フレームの変数を一覧表示する
    pub fn show_variables(&self) -> Result<()> {
        let container = self.require_container()?;
        let loader = self.require_value_loader()?;
        let roots = container.root_children();
        if roots.is_empty() {
            println!("no variables in this frame");
            return Ok(());
        }
        for child in roots {
            self.print_subtree(&container, child, loader, 0, VARS_DEPTH)?;
        }
        Ok(())
    }

    /// 名前で指定した変数をツリー表示する
    pub fn print_variable(&self, name: &str) -> Result<()> {
        let container = self.require_container()?;
        let loader = self.require_value_loader()?;
        let child = container
            .find_root_child(name)
            .ok_or_else(|| anyhow!("no variable named '{}' in this frame", name))?;
        self.print_subtree(&container, child, loader, 0, PRINT_DEPTH)
    }

    /// パターンに一致するシンボルを検索する
    pub fn find_symbols(&self, pattern: &str) -> Result<Vec<Symbol>> {
        Ok(self.require_symbols()?.find_symbols(pattern))
    }

    /// 停止位置を「アドレス + 関数 + ソース行」の形式に整形する
    pub fn describe_stop_location(&mut self) -> Result<String> {
        let bias = self.ensure_load_bias()?;
        let pc = self.require_registers()?.pc()?;
        let static_pc = pc.checked_sub(bias).unwrap_or(pc);

        let mut description = format!("0x{:x}", pc);
        if let Some(symbols) = &self.symbol_resolver {
            if let Some(symbol) = symbols.reverse_resolve(static_pc) {
                description.push_str(&format!(" in {}", symbol.display_name()));
            }
        }
        if let Some(lines) = &self.line_info {
            if let Ok(Some(info)) = lines.lookup(static_pc) {
                description.push_str(&format!(" at {}:{}", info.file, info.line));
            }
        }
        Ok(description)
    }

    /// 子スロットとその配下を解決しながら表示する
    fn print_subtree(
        &self,
        container: &Arc<ValueNodeContainer>,
        child: ChildId,
        loader: &ValueLoader,
        indent: usize,
        depth: usize,
    ) -> Result<()> {
        let Some(snapshot) = container.child_snapshot(child) else {
            return Ok(());
        };
        if snapshot.hidden {
            return Ok(());
        }
        let pad = "  ".repeat(indent);

        // 遅延作成された子はここでノードを実体化する
        let node = match snapshot.node {
            Some(node) => Some(node),
            None => {
                self.node_manager.add_child_nodes(child, loader)?;
                container.child_snapshot(child).and_then(|s| s.node)
            }
        };
        let Some(node) = node else {
            println!("{}{}: {}", pad, snapshot.name, snapshot.ty.name());
            return Ok(());
        };

        let resolution = self.resolver.resolve_and_wait(container, node, loader)?;
        match (&resolution.status, &resolution.value) {
            (Ok(()), Some(value)) => println!(
                "{}{}: {} = {}",
                pad,
                snapshot.name,
                snapshot.ty.name(),
                value
            ),
            (Ok(()), None) => println!("{}{}: {}", pad, snapshot.name, snapshot.ty.name()),
            (Err(err), _) => println!(
                "{}{}: {} = <unable to resolve: {}>",
                pad,
                snapshot.name,
                snapshot.ty.name(),
                err
            ),
        }

        if depth == 0 {
            return Ok(());
        }

        // 値を先に必要とするコンテナ型は、解決後のいま子が作れる
        if let Err(err) = self.node_manager.add_child_nodes(child, loader) {
            debug!("children of '{}' unavailable: {}", snapshot.name, err);
        }
        for grandchild in container.visible_node_children(node) {
            self.print_subtree(container, grandchild, loader, indent + 1, depth - 1)?;
        }
        Ok(())
    }

    /// PIEのロードバイアスを確定する（非PIEなら 0）
    fn ensure_load_bias(&mut self) -> Result<u64> {
        if let Some(bias) = self.load_bias {
            return Ok(bias);
        }
        let bias = if self.require_dwarf()?.is_pie() {
            self.require_memory()?.base_address()?
        } else {
            0
        };
        debug!("load bias: 0x{:x}", bias);
        self.load_bias = Some(bias);
        Ok(bias)
    }

    /// INT3 を踏むために一時的にブレークポイントを外してステップする
    fn step_over_breakpoint(&mut self) -> Result<()> {
        let pc = self.require_registers()?.pc()?;
        if let Some(id) = self.breakpoints.find_by_address(pc) {
            let memory = self.require_memory()?.clone();
            self.breakpoints.disable(id, &memory)?;
            self.require_process()?.step()?;
            self.breakpoints.enable(id, &memory)?;
        }
        Ok(())
    }

    /// INT3 実行後のPCはブレークポイントの1バイト先を指すので巻き戻す
    fn rewind_to_breakpoint(&self) -> Result<()> {
        let registers = self.require_registers()?;
        let pc = registers.pc()?;
        if self
            .breakpoints
            .find_by_address(pc.wrapping_sub(1))
            .is_some()
        {
            registers.set_pc(pc - 1)?;
        }
        Ok(())
    }

    /// ターゲット終了後の後片付け
    fn clear_target(&mut self) {
        if let Some(loader) = &self.loader {
            if let Err(err) = self.node_manager.set_stack_frame(None, loader) {
                debug!("failed to clear the value tree: {}", err);
            }
        }
        self.loader = None;
        self.process = None;
        self.memory = None;
        self.registers = None;
        self.load_bias = None;
        self.breakpoints = BreakpointManager::new();
    }

    fn require_process(&self) -> Result<&Process> {
        self.process
            .as_ref()
            .ok_or_else(|| anyhow!("no target process"))
    }

    fn require_memory(&self) -> Result<&Arc<ProcessMemory>> {
        self.memory
            .as_ref()
            .ok_or_else(|| anyhow!("no target process"))
    }

    fn require_registers(&self) -> Result<&Registers> {
        self.registers
            .as_ref()
            .ok_or_else(|| anyhow!("no target process"))
    }

    fn require_dwarf(&self) -> Result<&DwarfLoader> {
        self.dwarf_loader
            .as_ref()
            .ok_or_else(|| anyhow!("no binary loaded"))
    }

    fn require_symbols(&self) -> Result<&SymbolResolver> {
        self.symbol_resolver
            .as_ref()
            .ok_or_else(|| anyhow!("no binary loaded"))
    }

    fn require_catalog(&self) -> Result<&Arc<TypeCatalog>> {
        self.type_catalog
            .as_ref()
            .ok_or_else(|| anyhow!("no binary loaded"))
    }

    fn require_container(&self) -> Result<Arc<ValueNodeContainer>> {
        self.node_manager
            .container()
            .ok_or_else(|| anyhow!("no frame (stop the target first)"))
    }

    fn require_value_loader(&self) -> Result<&ValueLoader> {
        self.loader
            .as_ref()
            .ok_or_else(|| anyhow!("no frame (stop the target first)"))
    }
}
