//! Function metadata: types with signature hashes, defined-function
//! records, import records and external funcref bindings.

use crate::store::ContextId;
use wasm5_core::ValueType;

/// A function type together with its signature hashes.
///
/// Two hashes identify a type for the `call_indirect`/`call_ref` check:
/// `h1` folds the parameter and result types in order, `h2` packs the
/// parameter and result counts. Equal `(h1, h2)` pairs mean identical
/// types; the compiler must obtain its hashes from this type so the rule
/// cannot diverge between emitter and checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    params: Box<[ValueType]>,
    results: Box<[ValueType]>,
    sig_hash1: u64,
    sig_hash2: u64,
}

const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

fn fnv1a_step(hash: u64, byte: u8) -> u64 {
    (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
}

impl FuncType {
    /// Creates a function type and computes its signature hashes.
    pub fn new(
        params: impl Into<Box<[ValueType]>>,
        results: impl Into<Box<[ValueType]>>,
    ) -> Self {
        let params = params.into();
        let results = results.into();
        let mut hash = FNV_OFFSET_BASIS;
        for param in params.iter() {
            hash = fnv1a_step(hash, param.tag());
        }
        // Separator so that moving a type across the param/result split
        // changes the hash.
        hash = fnv1a_step(hash, 0xFF);
        for result in results.iter() {
            hash = fnv1a_step(hash, result.tag());
        }
        let sig_hash2 = ((params.len() as u64) << 16) | results.len() as u64;
        Self {
            params,
            results,
            sig_hash1: hash,
            sig_hash2,
        }
    }

    /// The parameter types.
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    /// The result types.
    pub fn results(&self) -> &[ValueType] {
        &self.results
    }

    /// The order-sensitive type hash.
    pub fn sig_hash1(&self) -> u64 {
        self.sig_hash1
    }

    /// The packed `(num_params << 16) | num_results` hash.
    pub fn sig_hash2(&self) -> u64 {
        self.sig_hash2
    }

    /// Returns `true` if both signature hashes match.
    pub fn matches(&self, other: &FuncType) -> bool {
        self.sig_hash1 == other.sig_hash1 && self.sig_hash2 == other.sig_hash2
    }
}

/// Metadata of a function defined in this module.
#[derive(Debug, Copy, Clone)]
pub struct FuncMeta {
    /// Absolute word index of the function's `entry` instruction.
    pub entry: usize,
    /// Total frame slots: parameters plus declared locals.
    pub num_locals: usize,
    /// Index into the module's type table.
    pub type_idx: usize,
}

/// Where an imported function resolves to.
#[derive(Debug, Copy, Clone)]
pub enum ImportTarget {
    /// A host handler of the spectest/WASI bank.
    Host(u32),
    /// A defined function of another registered context.
    Linked { context: ContextId, func_idx: usize },
    /// Not resolved by the loader; invoking it consumes the arguments and
    /// produces zeroed results.
    Unresolved,
}

/// Metadata of an imported function.
#[derive(Debug, Copy, Clone)]
pub struct ImportMeta {
    pub num_params: usize,
    pub num_results: usize,
    pub target: ImportTarget,
}

/// A function of another context made referenceable in this one.
///
/// Table entries past the imported and defined index ranges name entries
/// of this list, which the linker appends when it shares funcrefs across
/// module boundaries.
#[derive(Debug, Copy, Clone)]
pub struct ExternFuncRef {
    pub context: ContextId,
    pub func_idx: usize,
    pub num_params: usize,
    pub num_results: usize,
}
