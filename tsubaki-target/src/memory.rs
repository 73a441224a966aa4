//! ターゲットプロセスのメモリアクセス
//!
//! /proc/pid/mem を使った読み書きが基本で、EIO（未マッピング領域など）の
//! 場合は PTRACE_PEEKDATA にフォールバックします。値解決エンジンの
//! `TargetMemory` トレイトはこの型が実装します。

use crate::Result;
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom, Write as _};
use tracing::debug;

/// メモリマッピング情報（/proc/pid/maps の1行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

impl MemoryMapping {
    /// maps の1行を解析する
    ///
    /// フォーマット: "address perms offset dev inode pathname"
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            return None;
        }

        let (start, end) = parts[0].split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        let offset = u64::from_str_radix(parts[2], 16).ok()?;

        let mut perms = parts[1].chars();
        let readable = perms.next() == Some('r');
        let writable = perms.next() == Some('w');
        let executable = perms.next() == Some('x');

        Some(Self {
            start,
            end,
            offset,
            readable,
            writable,
            executable,
        })
    }
}

/// ターゲットプロセスのメモリ
pub struct ProcessMemory {
    pid: Pid,
}

impl ProcessMemory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/mem が EIO を返す領域は PTRACE_PEEKDATA で読み直します。
    pub fn read(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(address, size) {
            Ok(data) => Ok(data),
            Err(err) => {
                let is_eio = err
                    .downcast_ref::<std::io::Error>()
                    .and_then(|io_err| io_err.raw_os_error())
                    == Some(5);
                if is_eio {
                    debug!("falling back to ptrace read at 0x{:x}", address);
                    return self.read_via_ptrace(address, size);
                }
                Err(err)
            }
        }
    }

    fn read_via_proc_mem(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;
        file.seek(SeekFrom::Start(address))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// PTRACE_PEEKDATA でメモリを読み取る
    ///
    /// word 単位の読み取りなので小さなデータ向けです。
    pub fn read_via_ptrace(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let word_size = std::mem::size_of::<usize>();
        let mut data = Vec::with_capacity(size);

        for offset in (0..size).step_by(word_size) {
            let word_address = (address as usize + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_address).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to read via ptrace at 0x{:x}: {}",
                    address as usize + offset,
                    e
                )
            })?;

            let bytes = word.to_ne_bytes();
            let remaining = size - offset;
            data.extend_from_slice(&bytes[..remaining.min(word_size)]);
        }

        data.truncate(size);
        Ok(data)
    }

    /// メモリへデータを書き込む
    pub fn write(&self, address: u64, data: &[u8]) -> Result<()> {
        let mem_path = self.mem_path();
        let mut file = OpenOptions::new()
            .write(true)
            .open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {} for writing: {}", mem_path, e))?;
        file.seek(SeekFrom::Start(address))
            .map_err(|e| anyhow::anyhow!("Failed to seek to address 0x{:x}: {}", address, e))?;
        file.write_all(data).map_err(|e| {
            anyhow::anyhow!("Failed to write {} bytes to 0x{:x}: {}", data.len(), address, e)
        })?;
        Ok(())
    }

    /// 1バイト読み取る（ブレークポイントのパッチ用）
    pub fn read_u8(&self, address: u64) -> Result<u8> {
        Ok(self.read(address, 1)?[0])
    }

    /// 1バイト書き込む（ブレークポイントのパッチ用）
    pub fn write_u8(&self, address: u64, value: u8) -> Result<()> {
        self.write(address, &[value])
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        let mut mappings = Vec::new();
        for line in reader.lines() {
            if let Some(mapping) = MemoryMapping::parse(&line?) {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }

    /// 指定アドレスがマッピングされているか
    pub fn is_mapped(&self, address: u64) -> Result<bool> {
        let mappings = self.mappings()?;
        Ok(mappings
            .iter()
            .any(|m| address >= m.start && address < m.end))
    }

    /// 実行可能ファイルのベースアドレスを取得する
    ///
    /// PIE の場合、デバッグ情報のアドレスはファイル内オフセットなので、
    /// 最初の実行可能セグメントの開始アドレスからそのファイルオフセットを
    /// 引いた値がロードバイアスになります。
    pub fn base_address(&self) -> Result<u64> {
        for mapping in self.mappings()? {
            if mapping.executable {
                return Ok(mapping.start - mapping.offset);
            }
        }
        Err(anyhow::anyhow!(
            "Could not find executable segment in memory mappings"
        ))
    }
}

/// 値解決エンジンのメモリコレボレータ実装
///
/// 読み取れたバイト数を返し、完全に読めない場合のみエラーにします。
impl tsubaki_value::TargetMemory for ProcessMemory {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> tsubaki_value::Result<usize> {
        match self.read(address, buffer.len()) {
            Ok(data) => {
                buffer[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Err(err) => {
                // 読めないアドレスは BadAddress、それ以外は I/O エラー
                match self.is_mapped(address) {
                    Ok(false) => Err(tsubaki_value::Error::BadAddress(address)),
                    _ => Err(tsubaki_value::Error::io(err)),
                }
            }
        }
    }

    fn write_memory(&self, address: u64, data: &[u8]) -> tsubaki_value::Result<()> {
        self.write(address, data)
            .map_err(tsubaki_value::Error::io)
    }
}
