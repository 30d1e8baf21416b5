//! Crate-wide error type.

/// The kinds of errors that can befall a caller of [`crate::View`],
/// [`crate::Builder`], or [`crate::Linker`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The magic bytes didn't match, or the buffer was too short to contain
    /// even the 4-byte magic.
    #[error("invalid SLF header: {0}")]
    InvalidHeader(String),

    /// Some later validation failed: a truncated buffer, a table offset out
    /// of bounds, malformed string-table tiling, a missing zero terminator,
    /// an unsupported `symbol_size`, or an out-of-section symbol/relocation
    /// offset.
    #[error("invalid SLF data: {0}")]
    InvalidData(String),

    /// [`crate::Linker::link`] was invoked with zero modules.
    #[error("nothing to link: no modules were provided")]
    NothingToLink,

    /// A module's `symbol_size` disagreed with the link-wide size.
    #[error("mismatching symbol size: expected {expected:?}, found {found:?}")]
    MismatchingSymbolSize {
        /// The size adopted (from the first module, or an explicit override).
        expected: crate::header::SymbolSize,
        /// The size the offending module declared.
        found: crate::header::SymbolSize,
    },

    /// A patch computation overflowed its symbol width in `add` mode.
    #[error("integer overflow while patching a {width}-bit value")]
    IntegerOverflow {
        /// The width, in bits, of the site being patched.
        width: u32,
    },

    /// A resolved address did not fit in the symbol width during a
    /// `replace`-mode patch.
    #[error("value {value:#x} does not fit in {width} bits")]
    ValueDoesNotFit {
        /// The value that was too large.
        value: u64,
        /// The width, in bits, of the site being patched.
        width: u32,
    },

    /// An underlying stream operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A `scroll` encode/decode operation failed.
    #[error("binary encoding error: {0}")]
    Scroll(#[from] scroll::Error),
}

/// A specialized `Result` for SLF operations.
pub type Result<T> = std::result::Result<T, Error>;
