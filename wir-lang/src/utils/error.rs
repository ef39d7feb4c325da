//! Errors raised when an invariant of the module-assembly layer is broken.
//!
//! Every variant here is fatal for the compilation: it means an earlier pass
//! (or this layer itself) produced inconsistent state. A concrete type that
//! does not implement an interface is *not* an error and never shows up here.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("value type `{0}` is already registered")]
    DuplicateType(String),
    #[error("type `{name}` is not {expected}")]
    WrongVariant { name: String, expected: &'static str },
    #[error("type mismatch, expected `{expected}` but the actual was `{actual}`")]
    TypeMismatch { expected: String, actual: String },
    #[error("usage hash of type `{0}` is already assigned")]
    HashAlreadySet(String),
    #[error("method `{method}` of `{ty}` has no target function")]
    MissingMethodTarget { ty: String, method: String },
    #[error("method `{method}` is already declared on `{ty}`")]
    DuplicateMethod { ty: String, method: String },
    #[error("global `{0}` not found")]
    GlobalNotFound(String),
    #[error("global `{0}` is already declared")]
    DuplicateGlobal(String),
    #[error("source value is already bound to global `{0}`")]
    DuplicateGlobalBinding(String),
    #[error("expected {expected} value slot(s) for `{ty}`, got {actual}")]
    SlotCountMismatch {
        ty: String,
        expected: usize,
        actual: usize,
    },
    #[error("no reservation at data segment address {0}")]
    UnreservedPatch(u32),
    #[error("patch at address {addr} has {actual} bytes but {expected} bytes were reserved")]
    PatchSizeMismatch { addr: u32, expected: u32, actual: u32 },
    #[error("data segment has unpatched reservations at {0:?}")]
    UnpatchedReservation(Vec<u32>),
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn dump_to_string(errs: &[Error]) -> String {
    let mut res = String::new();
    for e in errs {
        res += e.to_string().as_str();
        res.push('\n');
    }
    res
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dump_lists_one_error_per_line() {
        crate::utils::init_test_logger();
        let errs = [
            Error::GlobalNotFound("$main.x".to_string()),
            Error::PatchSizeMismatch {
                addr: 16,
                expected: 8,
                actual: 4,
            },
        ];
        let dump = dump_to_string(&errs);
        log::debug!("{dump}");
        assert_eq!(
            dump,
            "global `$main.x` not found\n\
             patch at address 16 has 4 bytes but 8 bytes were reserved\n"
        );
    }
}
