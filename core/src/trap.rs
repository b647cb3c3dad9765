use core::fmt::{self, Display};

/// A non-resumable failure raised by a WebAssembly instruction.
///
/// Traps unwind the entire top-level execution and surface to the driver
/// as a numeric code. Side effects performed by instructions preceding the
/// trapping one (memory writes, table mutations, host output) are kept.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrapCode {
    /// Wasm code executed the `unreachable` opcode.
    Unreachable,

    /// Attempt to divide by zero.
    ///
    /// Raised by `div` and `rem` instructions with a zero divisor.
    DivisionByZero,

    /// An integer arithmetic operation overflowed.
    ///
    /// Raised by signed division of `INT_MIN / -1` and by trapping
    /// float-to-int truncation of an out-of-range value.
    IntegerOverflow,

    /// Attempt to truncate a NaN into an integer.
    InvalidConversion,

    /// A load, store or bulk memory operation touched bytes beyond the
    /// current size of the linear memory.
    ///
    /// Addresses are unsigned, so negative addresses cannot alias valid
    /// ones; bounds arithmetic is performed in 64 bits so intermediate
    /// overflow cannot either.
    OutOfBoundsMemory,

    /// A table element index was out of bounds.
    ///
    /// This is the "undefined element" trap of `call_indirect` and of
    /// `table.get`/`table.set`.
    OutOfBoundsTable,

    /// The function found by `call_indirect` or `call_ref` does not have
    /// the type the call site expects.
    IndirectCallTypeMismatch,

    /// `call_ref` or `return_call_ref` consumed a null function reference.
    NullFunctionReference,

    /// The operand stack could not be allocated, or call nesting exceeded
    /// its bound.
    StackOverflow,

    /// `call_indirect` hit a null table entry.
    UninitializedElement,

    /// A bulk table operation (`table.init`, `table.copy`, `table.fill`,
    /// `table.grow` initialization) ran past a table or segment boundary.
    TableBoundsAccess,

    /// A null reference reached `ref.as_non_null` or a struct/array
    /// accessor.
    NullReference,
}

impl TrapCode {
    /// Returns the numeric code transmitted to the driver.
    ///
    /// Zero is reserved for "no trap"; the remaining values are fixed by
    /// the driver ABI and must not be reordered.
    pub fn code(self) -> u32 {
        match self {
            TrapCode::Unreachable => 1,
            TrapCode::DivisionByZero => 2,
            TrapCode::IntegerOverflow => 3,
            TrapCode::InvalidConversion => 4,
            TrapCode::OutOfBoundsMemory => 5,
            TrapCode::OutOfBoundsTable => 6,
            TrapCode::IndirectCallTypeMismatch => 7,
            TrapCode::NullFunctionReference => 8,
            TrapCode::StackOverflow => 9,
            TrapCode::UninitializedElement => 10,
            TrapCode::TableBoundsAccess => 11,
            TrapCode::NullReference => 12,
        }
    }

    /// Returns the trap message as specified by the WebAssembly specification.
    ///
    /// # Note
    ///
    /// This API is primarily useful for the Wasm spec testsuite but might have
    /// other uses since it avoids heap memory allocation in certain cases.
    pub fn trap_message(&self) -> &'static str {
        match self {
            TrapCode::Unreachable => "unreachable",
            TrapCode::DivisionByZero => "integer divide by zero",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::InvalidConversion => "invalid conversion to integer",
            TrapCode::OutOfBoundsMemory => "out of bounds memory access",
            TrapCode::OutOfBoundsTable => "undefined element",
            TrapCode::IndirectCallTypeMismatch => "indirect call type mismatch",
            TrapCode::NullFunctionReference => "null function reference",
            TrapCode::StackOverflow => "call stack exhausted",
            TrapCode::UninitializedElement => "uninitialized element",
            TrapCode::TableBoundsAccess => "out of bounds table access",
            TrapCode::NullReference => "null reference",
        }
    }
}

impl Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.trap_message())
    }
}

#[cfg(test)]
mod tests {
    use super::TrapCode;

    #[test]
    fn driver_codes_are_stable() {
        let codes = [
            (TrapCode::Unreachable, 1),
            (TrapCode::DivisionByZero, 2),
            (TrapCode::IntegerOverflow, 3),
            (TrapCode::InvalidConversion, 4),
            (TrapCode::OutOfBoundsMemory, 5),
            (TrapCode::OutOfBoundsTable, 6),
            (TrapCode::IndirectCallTypeMismatch, 7),
            (TrapCode::NullFunctionReference, 8),
            (TrapCode::StackOverflow, 9),
            (TrapCode::UninitializedElement, 10),
            (TrapCode::TableBoundsAccess, 11),
            (TrapCode::NullReference, 12),
        ];
        for (trap, code) in codes {
            assert_eq!(trap.code(), code);
        }
    }

    #[test]
    fn messages_match_spec_testsuite() {
        assert_eq!(TrapCode::OutOfBoundsTable.trap_message(), "undefined element");
        assert_eq!(
            TrapCode::UninitializedElement.trap_message(),
            "uninitialized element"
        );
        assert_eq!(
            TrapCode::TableBoundsAccess.trap_message(),
            "out of bounds table access"
        );
    }
}
