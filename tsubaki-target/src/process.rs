//! プロセス制御

use crate::Result;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CString;
use std::path::Path;
use tracing::debug;

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// ブレークポイントヒット（SIGTRAP）
    Breakpoint,
    /// ステップ実行完了（SIGTRAP）
    Step,
    /// シグナル受信
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// その他の停止
    Other,
}

/// デバッグ対象のプロセス
pub struct Process {
    pid: Pid,
}

impl Process {
    /// 実行可能ファイルを起動してデバッグ対象プロセスを開始する
    ///
    /// forkした子で PTRACE_TRACEME を設定してから execve します。戻った
    /// 時点でプロセスは最初の命令で停止しており、メモリマッピングも初期化
    /// 済みなのでブレークポイントを安全に仕込めます。
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        use nix::unistd::{execve, fork, ForkResult};

        let program_path = program
            .as_ref()
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid program path"))?;
        let program_cstring = CString::new(program_path)?;

        let mut cstring_args = vec![program_cstring.clone()];
        for arg in args {
            cstring_args.push(CString::new(arg.as_str())?);
        }

        // 環境変数は親プロセスから継承する
        let env: Vec<CString> = std::env::vars()
            .map(|(key, val)| CString::new(format!("{}={}", key, val)).map_err(anyhow::Error::from))
            .collect::<Result<Vec<_>>>()?;

        match unsafe { fork()? } {
            ForkResult::Parent { child } => {
                // execve 直後の停止を待つ
                match waitpid(child, None)? {
                    WaitStatus::Stopped(_, _) => {}
                    status => {
                        return Err(anyhow::anyhow!(
                            "Unexpected wait status after execve: {:?}",
                            status
                        ))
                    }
                }

                // マッピングを初期化するため1ステップ進める
                ptrace::step(child, None)?;
                match waitpid(child, None)? {
                    WaitStatus::Stopped(_, _) => {
                        debug!("spawned target process {}", child);
                        Ok(Self { pid: child })
                    }
                    status => Err(anyhow::anyhow!(
                        "Unexpected wait status after step: {:?}",
                        status
                    )),
                }
            }
            ForkResult::Child => {
                ptrace::traceme()?;
                execve(&program_cstring, &cstring_args, &env)?;
                unreachable!("execve failed");
            }
        }
    }

    /// 既存のプロセスにアタッチする
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid)?;
        waitpid(pid, None)?;
        debug!("attached to process {}", pid);
        Ok(Self { pid })
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスを実行継続する
    pub fn continue_execution(&self) -> Result<()> {
        ptrace::cont(self.pid, None)?;
        Ok(())
    }

    /// プロセスを実行継続して次の停止イベントを待つ
    pub fn continue_and_wait(&self) -> Result<StopReason> {
        ptrace::cont(self.pid, None)?;
        self.wait_for_stop(StopReason::Breakpoint)
    }

    /// 1命令だけ実行して停止する
    ///
    /// 関数呼び出しの中にも入ります（ステップイン）。
    pub fn step(&self) -> Result<StopReason> {
        ptrace::step(self.pid, None)?;
        self.wait_for_stop(StopReason::Step)
    }

    /// プロセスへ SIGSTOP を送って停止させる
    pub fn stop(&self) -> Result<()> {
        nix::sys::signal::kill(self.pid, Signal::SIGSTOP)?;
        Ok(())
    }

    /// 停止イベントを待ち、SIGTRAP を指定の理由として解釈する
    fn wait_for_stop(&self, trap_reason: StopReason) -> Result<StopReason> {
        match waitpid(self.pid, None)? {
            WaitStatus::Stopped(_, signal) => {
                if signal == Signal::SIGTRAP {
                    Ok(trap_reason)
                } else {
                    Ok(StopReason::Signal(signal))
                }
            }
            WaitStatus::Exited(_, code) => Ok(StopReason::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Ok(StopReason::Signal(signal)),
            _ => Ok(StopReason::Other),
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = ptrace::detach(self.pid, None);
    }
}
