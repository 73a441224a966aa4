//! Tsubaki デバッガCLI
//!
//! ターゲットを起動（またはアタッチ）し、対話シェルでブレークポイント
//! 設定・実行制御・停止中フレームの変数表示を行います。

mod breakpoint;
mod command;
mod debugger;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;
use tsubaki_target::StopReason;

use command::Command;
use debugger::Debugger;

#[derive(Parser)]
#[command(name = "tsubaki", about = "A value-resolving debugger for Linux")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// バイナリを起動してデバッグする
    Run {
        /// デバッグ対象のバイナリ
        binary: String,
        /// ターゲットに渡す引数
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// 実行中のプロセスにアタッチする
    Attach {
        /// デバッグ情報を読み取るバイナリ
        binary: String,
        /// プロセスID
        pid: i32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut debugger = Debugger::new()?;

    match cli.command {
        CliCommand::Run { binary, args } => {
            debugger.load_binary(&binary)?;
            debugger.spawn(&binary, &args)?;
        }
        CliCommand::Attach { binary, pid } => {
            debugger.load_binary(&binary)?;
            debugger.attach(pid)?;
        }
    }

    run_repl(&mut debugger)
}

fn run_repl(debugger: &mut Debugger) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Type 'help' for a list of commands.");

    loop {
        match editor.readline("(tsubaki) ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                editor.add_history_entry(trimmed)?;

                match Command::parse(trimmed) {
                    Some(Command::Quit) => break,
                    Some(command) => {
                        if let Err(err) = handle_command(debugger, command) {
                            eprintln!("error: {:#}", err);
                        }
                    }
                    None => eprintln!("unknown command: {} (try 'help')", trimmed),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_command(debugger: &mut Debugger, command: Command) -> Result<()> {
    match command {
        Command::Break(target) => handle_break(debugger, &target),
        Command::Delete(id) => {
            let address = debugger.remove_breakpoint(id)?;
            println!("breakpoint {} removed (was at 0x{:x})", id, address);
            Ok(())
        }
        Command::Breakpoints => {
            debugger.show_breakpoints();
            Ok(())
        }
        Command::Continue => handle_continue(debugger),
        Command::Step => handle_step(debugger),
        Command::Vars => debugger.show_variables(),
        Command::Print(name) => debugger.print_variable(&name),
        Command::Find(pattern) => handle_find(debugger, &pattern),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Quit => Ok(()),
    }
}

fn handle_break(debugger: &mut Debugger, target: &str) -> Result<()> {
    // 16進アドレスかシンボル名のどちらか
    if let Some(hex) = target.strip_prefix("0x") {
        let address = u64::from_str_radix(hex, 16)?;
        let id = debugger.set_breakpoint(address)?;
        println!("breakpoint {} at 0x{:x}", id, address);
    } else {
        let (id, address) = debugger.set_breakpoint_by_symbol(target)?;
        println!("breakpoint {} at 0x{:x} ({})", id, address, target);
    }
    Ok(())
}

fn handle_continue(debugger: &mut Debugger) -> Result<()> {
    match debugger.continue_and_wait()? {
        StopReason::Exited(code) => {
            println!("target exited with code {}", code);
            return Ok(());
        }
        StopReason::Breakpoint => println!(
            "stopped at breakpoint: {}",
            debugger.describe_stop_location()?
        ),
        StopReason::Signal(signal) => println!(
            "stopped by signal {:?}: {}",
            signal,
            debugger.describe_stop_location()?
        ),
        _ => println!("stopped: {}", debugger.describe_stop_location()?),
    }
    report_frame(debugger);
    Ok(())
}

fn handle_step(debugger: &mut Debugger) -> Result<()> {
    match debugger.step()? {
        StopReason::Exited(code) => {
            println!("target exited with code {}", code);
            return Ok(());
        }
        _ => println!("stopped: {}", debugger.describe_stop_location()?),
    }
    report_frame(debugger);
    Ok(())
}

fn handle_find(debugger: &Debugger, pattern: &str) -> Result<()> {
    const LIMIT: usize = 20;

    let symbols = debugger.find_symbols(pattern)?;
    if symbols.is_empty() {
        println!("no symbols match '{}'", pattern);
        return Ok(());
    }
    for symbol in symbols.iter().take(LIMIT) {
        println!("0x{:016x} {}", symbol.address, symbol.display_name());
    }
    if symbols.len() > LIMIT {
        println!("... and {} more", symbols.len() - LIMIT);
    }
    Ok(())
}

/// 停止後にフレームを読み直す。失敗しても実行制御は続けられる
fn report_frame(debugger: &mut Debugger) {
    match debugger.refresh_frame() {
        Ok(Some(function)) => println!("in {}", function),
        Ok(None) => debug!("frame rebuilt (function unknown)"),
        Err(err) => eprintln!("warning: could not read the frame: {:#}", err),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  break <addr|symbol>  set a breakpoint (b)");
    println!("  delete <id>          remove a breakpoint (d)");
    println!("  breakpoints          list breakpoints (bl)");
    println!("  continue             resume execution (c)");
    println!("  step                 execute one instruction (s)");
    println!("  vars                 list variables in the current frame (v)");
    println!("  print <name>         show a variable as a tree (p)");
    println!("  find <pattern>       search symbols");
    println!("  help                 show this message (h)");
    println!("  quit                 exit the debugger (q)");
}
