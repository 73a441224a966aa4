//! ELFとDWARFの読み込み

use crate::Result;
use object::{Object, ObjectSection};
use std::fs;
use std::path::Path;

/// 'static なELFデータを参照するDWARFリーダー
pub type DwarfSlice = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// DWARFローダー
///
/// ELFファイル全体を読み込み、`Box::leak` で 'static 化したデータの上に
/// オブジェクトファイルとDWARFコンテキストを構築します。デバッガの生存
/// 期間中ずっと参照されるため、リークは許容します。
pub struct DwarfLoader {
    object_file: object::File<'static>,
    dwarf: gimli::Dwarf<DwarfSlice>,
    endian: gimli::RunTimeEndian,
}

impl DwarfLoader {
    /// ELFファイルからDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let endian = if object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let dwarf = Self::load_sections(&object_file, endian)?;

        Ok(Self {
            object_file,
            dwarf,
            endian,
        })
    }

    /// オブジェクトファイルのセクションからDWARFコンテキストを構築する
    fn load_sections(
        object_file: &object::File<'static>,
        endian: gimli::RunTimeEndian,
    ) -> Result<gimli::Dwarf<DwarfSlice>> {
        let load_section = |id: gimli::SectionId| -> Result<DwarfSlice> {
            let data = object_file
                .section_by_name(id.name())
                .and_then(|section| section.data().ok())
                .unwrap_or(&[]);
            Ok(gimli::EndianSlice::new(data, endian))
        };

        gimli::Dwarf::load(load_section)
            .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))
    }

    /// DWARFコンテキストへの参照を取得する
    pub fn dwarf(&self) -> &gimli::Dwarf<DwarfSlice> {
        &self.dwarf
    }

    /// 独立したDWARFコンテキストをもう1つ構築する
    ///
    /// セクションデータは 'static なので安価です。所有権ごとコンテキストを
    /// 要求する利用側（addr2line など）に渡します。
    pub fn load_dwarf(&self) -> Result<gimli::Dwarf<DwarfSlice>> {
        Self::load_sections(&self.object_file, self.endian)
    }

    /// オブジェクトファイルへの参照を取得する
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIEの場合、デバッグ情報内のアドレスはファイル内オフセットであり、
    /// 実行時にはロードバイアスを加算する必要があります。ET_DYN が PIE
    /// 実行ファイルまたは共有ライブラリに対応します。
    pub fn is_pie(&self) -> bool {
        matches!(self.object_file.kind(), object::ObjectKind::Dynamic)
    }
}
