//! テスト用のモックと型のフィクスチャ

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tsubaki_value::{
    AddressKind, Architecture, CompoundKind, CpuState, DataMember, EnumerationValue, Error,
    Register, Result, TargetMemory, Type, TypeInformation, TypeLookupConstraints, TypeVariant,
    ValueLoader, ValueType,
};

pub struct MockArchitecture {
    registers: Vec<Register>,
}

impl MockArchitecture {
    pub fn little_endian() -> Self {
        Self {
            registers: vec![
                Register {
                    index: 0,
                    name: "rax",
                    byte_size: 8,
                },
                Register {
                    index: 1,
                    name: "rdx",
                    byte_size: 8,
                },
            ],
        }
    }
}

impl Architecture for MockArchitecture {
    fn address_size(&self) -> u64 {
        8
    }

    fn is_big_endian(&self) -> bool {
        false
    }

    fn registers(&self) -> &[Register] {
        &self.registers
    }
}

/// 連続した1ブロックのメモリ像
pub struct MockMemory {
    base: u64,
    pub data: Mutex<Vec<u8>>,
}

impl MockMemory {
    pub fn new(base: u64, data: Vec<u8>) -> Self {
        Self {
            base,
            data: Mutex::new(data),
        }
    }
}

impl TargetMemory for MockMemory {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> Result<usize> {
        let data = self.data.lock().unwrap();
        if address < self.base {
            return Err(Error::BadAddress(address));
        }
        let offset = (address - self.base) as usize;
        if offset >= data.len() {
            return Err(Error::BadAddress(address));
        }
        let available = (data.len() - offset).min(buffer.len());
        buffer[..available].copy_from_slice(&data[offset..offset + available]);
        Ok(available)
    }

    fn write_memory(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        if address < self.base {
            return Err(Error::BadAddress(address));
        }
        let offset = (address - self.base) as usize;
        if offset + bytes.len() > data.len() {
            return Err(Error::BadAddress(address));
        }
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

pub struct MockCpuState {
    pub registers: Mutex<HashMap<u16, u64>>,
}

impl MockCpuState {
    pub fn new(values: &[(u16, u64)]) -> Self {
        Self {
            registers: Mutex::new(values.iter().copied().collect()),
        }
    }
}

impl CpuState for MockCpuState {
    fn register_value(&self, register: &Register) -> Option<u64> {
        self.registers.lock().unwrap().get(&register.index).copied()
    }

    fn set_register_value(&self, register: &Register, value: u64) -> Result<()> {
        self.registers.lock().unwrap().insert(register.index, value);
        Ok(())
    }

    fn stack_pointer(&self) -> u64 {
        0
    }
}

/// 名前引きの型テーブル
#[derive(Default)]
pub struct MockTypeInformation {
    pub types: Mutex<HashMap<String, Arc<Type>>>,
}

impl TypeInformation for MockTypeInformation {
    fn lookup_type_by_name(
        &self,
        name: &str,
        constraints: &TypeLookupConstraints,
    ) -> Result<Arc<Type>> {
        let types = self.types.lock().unwrap();
        match types.get(name) {
            Some(ty) if constraints.matches(ty) => Ok(Arc::clone(ty)),
            _ => Err(Error::EntryNotFound),
        }
    }
}

/// ローダーとモック一式
pub struct TestTarget {
    pub loader: ValueLoader,
    pub memory: Arc<MockMemory>,
    pub cpu: Arc<MockCpuState>,
}

impl TestTarget {
    pub fn with_memory(base: u64, data: Vec<u8>) -> Self {
        let memory = Arc::new(MockMemory::new(base, data));
        let cpu = Arc::new(MockCpuState::new(&[]));
        let loader = ValueLoader::new(
            Arc::new(MockArchitecture::little_endian()),
            Arc::clone(&memory) as Arc<dyn TargetMemory>,
            Arc::clone(&cpu) as Arc<dyn CpuState>,
            Arc::new(MockTypeInformation::default()),
        );
        Self {
            loader,
            memory,
            cpu,
        }
    }
}

pub fn int32() -> Arc<Type> {
    Arc::new(Type::new(
        1,
        "int32",
        4,
        TypeVariant::Primitive {
            value_type: ValueType::Int32,
        },
    ))
}

pub fn char_type() -> Arc<Type> {
    Arc::new(Type::new(
        2,
        "char",
        1,
        TypeVariant::Primitive {
            value_type: ValueType::UInt8,
        },
    ))
}

pub fn pointer_to(target: Arc<Type>) -> Arc<Type> {
    let name = format!("{}*", target.name());
    Arc::new(Type::new(
        100 + target.id(),
        name,
        8,
        TypeVariant::Address {
            kind: AddressKind::Pointer,
            target,
        },
    ))
}

/// struct Point { int32 x; int32 y; }
pub fn point_type() -> Arc<Type> {
    Arc::new(Type::new(
        10,
        "Point",
        8,
        TypeVariant::Compound {
            kind: CompoundKind::Struct,
            base_types: Vec::new(),
            members: vec![
                DataMember {
                    name: "x".to_string(),
                    ty: int32(),
                    byte_offset: 0,
                },
                DataMember {
                    name: "y".to_string(),
                    ty: int32(),
                    byte_offset: 4,
                },
            ],
        },
    ))
}

/// enum Color { RED, GREEN, BLUE }
pub fn enum_type() -> Arc<Type> {
    Arc::new(Type::new(
        11,
        "Color",
        4,
        TypeVariant::Enumeration {
            base: Some(int32()),
            values: vec![
                EnumerationValue {
                    name: "RED".to_string(),
                    value: 0,
                },
                EnumerationValue {
                    name: "GREEN".to_string(),
                    value: 1,
                },
                EnumerationValue {
                    name: "BLUE".to_string(),
                    value: 2,
                },
            ],
        },
    ))
}

/// struct List { int32 count; int32* items; }（実行時要素数のコンテナ）
pub fn list_type() -> Arc<Type> {
    Arc::new(Type::new(
        12,
        "List",
        16,
        TypeVariant::Compound {
            kind: CompoundKind::Struct,
            base_types: Vec::new(),
            members: vec![
                DataMember {
                    name: "count".to_string(),
                    ty: int32(),
                    byte_offset: 0,
                },
                DataMember {
                    name: "items".to_string(),
                    ty: pointer_to(int32()),
                    byte_offset: 8,
                },
            ],
        },
    ))
}
