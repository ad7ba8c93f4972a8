//! Three-bit R/W/X permission with textual and numeric codecs.
//!
//! A [`Permission`] has three codecs:
//!
//! - a 3-bit unsigned integer (R=4, W=2, X=1) used by the persistent store,
//! - a 3-character lowercase literal (`r|-`, `w|-`, `x|-`) accepted from the
//!   operator,
//! - a 3-character capitalised glyph (`R|-`, `W|-`, `X|-`) used for display.
//!
//! A [`Mask`] is the query-side counterpart: each position holds `r|w|x`
//! (bit must be set), `-` (bit must be clear), or `_` (don't care). Masks
//! and literals are exactly three characters; anything else fails
//! validation.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Read/write/execute bits granted on a filesystem path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    /// Read bit.
    pub read: bool,
    /// Write bit.
    pub write: bool,
    /// Execute bit.
    pub exec: bool,
}

impl Permission {
    /// The `r-x` permission attached to links, executables, and shared
    /// objects discovered by the tracers.
    pub const READ_EXEC: Self = Self {
        read: true,
        write: false,
        exec: true,
    };

    /// The `rw-` permission implied by file-creating syscalls.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        exec: false,
    };

    /// The `r--` permission implied by read-only opens.
    pub const READ_ONLY: Self = Self {
        read: true,
        write: false,
        exec: false,
    };

    /// Parses a 3-character literal from `{r,-}{w,-}{x,-}`.
    ///
    /// Uppercase input is folded to lowercase before validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPermission`] for any other input.
    pub fn parse(input: &str) -> Result<Self> {
        let lower = input.to_ascii_lowercase();
        let invalid = || Error::InvalidPermission {
            input: input.to_string(),
        };

        let bytes = lower.as_bytes();
        if bytes.len() != 3 {
            return Err(invalid());
        }

        let cell = |byte: u8, set: u8| match byte {
            b if b == set => Ok(true),
            b'-' => Ok(false),
            _ => Err(invalid()),
        };

        Ok(Self {
            read: cell(bytes[0], b'r')?,
            write: cell(bytes[1], b'w')?,
            exec: cell(bytes[2], b'x')?,
        })
    }

    /// Encodes the permission as a 3-bit integer (R=4, W=2, X=1).
    #[must_use]
    pub const fn bits(self) -> u8 {
        (self.read as u8) << 2 | (self.write as u8) << 1 | self.exec as u8
    }

    /// Decodes a 3-bit integer; bits above the low three are ignored.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            read: bits & 0b100 != 0,
            write: bits & 0b010 != 0,
            exec: bits & 0b001 != 0,
        }
    }

    /// Decodes a permission column read back from the store.
    #[must_use]
    pub(crate) const fn from_stored(value: i64) -> Self {
        Self::from_bits((value & 0b111) as u8)
    }

    /// Returns `true` when every non-`_` mask position agrees with the
    /// corresponding bit.
    #[must_use]
    pub const fn matches(self, mask: Mask) -> bool {
        mask.cells[0].accepts(self.read)
            && mask.cells[1].accepts(self.write)
            && mask.cells[2].accepts(self.exec)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let glyph = |set, c| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            glyph(self.read, 'R'),
            glyph(self.write, 'W'),
            glyph(self.exec, 'X')
        )
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One position of a [`Mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MaskCell {
    /// The bit must be set (`r`, `w`, or `x`).
    Set,
    /// The bit must be clear (`-`).
    Clear,
    /// The bit is ignored (`_`).
    Any,
}

impl MaskCell {
    const fn accepts(self, bit: bool) -> bool {
        match self {
            Self::Set => bit,
            Self::Clear => !bit,
            Self::Any => true,
        }
    }
}

/// A 3-position permission query mask.
///
/// Unlike a [`Permission`] literal, each position may also be `_`, meaning
/// the corresponding bit is not compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mask {
    cells: [MaskCell; 3],
}

impl Mask {
    /// The mask matching every permission (`___`).
    pub const ANY: Self = Self {
        cells: [MaskCell::Any, MaskCell::Any, MaskCell::Any],
    };

    pub(crate) const fn from_cells(read: MaskCell, write: MaskCell, exec: MaskCell) -> Self {
        Self {
            cells: [read, write, exec],
        }
    }

    /// Parses a 3-character mask from `{r,-,_}{w,-,_}{x,-,_}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMask`] for any other input.
    pub fn parse(input: &str) -> Result<Self> {
        let lower = input.to_ascii_lowercase();
        let invalid = || Error::InvalidMask {
            input: input.to_string(),
        };

        let bytes = lower.as_bytes();
        if bytes.len() != 3 {
            return Err(invalid());
        }

        let cell = |byte: u8, set: u8| match byte {
            b if b == set => Ok(MaskCell::Set),
            b'-' => Ok(MaskCell::Clear),
            b'_' => Ok(MaskCell::Any),
            _ => Err(invalid()),
        };

        Ok(Self {
            cells: [
                cell(bytes[0], b'r')?,
                cell(bytes[1], b'w')?,
                cell(bytes[2], b'x')?,
            ],
        })
    }
}

impl FromStr for Mask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
