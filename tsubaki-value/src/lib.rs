//! Tsubaki 値モデルとロケーション解決
//!
//! このクレートは、停止中のターゲットプロセスから変数の値を読み取るための
//! 基盤を提供します。型記述子、デコード済みスカラー値、値のバイト列が
//! 格納されている場所（レジスタ／メモリのピース列）、およびそれらを
//! 組み立てるローダー／ライターを含みます。

pub mod bits;
pub mod error;
pub mod frame;
pub mod loader;
pub mod location;
pub mod traits;
pub mod types;
pub mod value;
pub mod writer;

pub use error::Error;
pub use frame::{StackFrame, Variable};
pub use loader::{ValueLoader, MAX_PIECE_SIZE, MAX_STRING_LENGTH};
pub use location::{PieceKind, ValueLocation, ValuePiece};
pub use traits::{Architecture, CpuState, Register, TargetMemory, TypeInformation};
pub use types::{
    AddressKind, ArrayDimension, BaseType, CompoundKind, DataMember, EnumerationValue, Modifiers,
    Type, TypeId, TypeLookupConstraints, TypeKind, TypeVariant,
};
pub use value::{Value, ValueType};
pub use writer::ValueWriter;

/// 値解決の結果型
pub type Result<T> = std::result::Result<T, Error>;
