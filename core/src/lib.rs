#![cfg_attr(not(feature = "std"), no_std)]

mod nan_preserving_float;
mod trap;
mod untyped;
mod value;

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub use self::{
    nan_preserving_float::{F32, F64},
    trap::TrapCode,
    untyped::{UntypedValue, FUNCREF_TAG, REF_NULL},
    value::{
        ArithmeticOps,
        ExtendInto,
        Float,
        FromValue,
        Integer,
        LittleEndianConvert,
        SignExtendFrom,
        TransmuteInto,
        TruncateSaturateInto,
        TryTruncateInto,
        Value,
        ValueType,
        WrapInto,
    },
};
