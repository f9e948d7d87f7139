//! Byte-signature search over a loaded module image.

use std::fmt;

use stereohook_common::{Error, Result};

/// Fallback signatures for the host's camera update, tried in order.
pub const CAMERA_UPDATE_PATTERNS: [&str; 3] = [
    "40 53 48 83 EC 20 48 8B D9 E8 ?? ?? ?? ?? 48 8B CB",
    "48 89 5C 24 ?? 57 48 83 EC ?? 48 8B D9 48 8B 89 ?? ?? ?? ?? 48 85 C9",
    "F3 0F 10 ?? ?? ?? ?? ?? F3 0F 10 ?? ?? ?? ?? ?? 48 8D ?? ?? ?? ?? ??",
];

/// A byte signature where `None` matches any byte.
#[derive(Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    /// Parses space separated hex bytes; `?` or `??` is a wildcard.
    pub fn parse(text: &str) -> Result<Self> {
        let bytes = text
            .split_whitespace()
            .map(|token| match token {
                "?" | "??" => Ok(None),
                hex if hex.len() <= 2 && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                    u8::from_str_radix(hex, 16)
                        .map(Some)
                        .map_err(|_| Error::config(format!("invalid pattern byte {hex:?}")))
                }
                other => Err(Error::config(format!("invalid pattern byte {other:?}"))),
            })
            .collect::<Result<Vec<_>>>()?;
        if bytes.is_empty() {
            return Err(Error::config("empty pattern"));
        }
        if bytes.iter().all(Option::is_none) {
            return Err(Error::config("pattern has no fixed bytes"));
        }
        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn matches_at(&self, window: &[u8]) -> bool {
        self.bytes
            .iter()
            .zip(window)
            .all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
    }

    /// Offset of the first match in `haystack`.
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        if haystack.len() < self.bytes.len() {
            return None;
        }
        haystack
            .windows(self.bytes.len())
            .position(|window| self.matches_at(window))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for byte in &self.bytes {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match byte {
                Some(b) => write!(f, "{b:02X}")?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

/// Address of the first match of `pattern` in the image at `base`.
///
/// # Safety
/// `base..base + len` must be readable for the duration of the call.
pub unsafe fn resolve_in_module(base: usize, len: usize, pattern: &Pattern) -> Option<usize> {
    if base == 0 || len == 0 {
        return None;
    }
    let image = std::slice::from_raw_parts(base as *const u8, len);
    pattern.find(image).map(|offset| base + offset)
}

/// First pattern in `patterns` that parses and matches, with its address.
///
/// # Safety
/// Same contract as [`resolve_in_module`].
pub unsafe fn resolve_first(base: usize, len: usize, patterns: &[&str]) -> Option<(usize, usize)> {
    patterns.iter().enumerate().find_map(|(index, text)| {
        let pattern = match Pattern::parse(text) {
            Ok(pattern) => pattern,
            Err(err) => {
                tracing::warn!("skipping signature {index}: {err}");
                return None;
            }
        };
        resolve_in_module(base, len, &pattern).map(|address| (index, address))
    })
}

const JMP_REL32: u8 = 0xE9;

/// Target of a rel32 CALL/JMP: the end of the instruction plus the signed
/// displacement.
fn relative_target(instruction: usize, instruction_len: usize, displacement: i32) -> usize {
    (instruction + instruction_len).wrapping_add_signed(displacement as isize)
}

/// Follows the rel32 operand found `offset` bytes into the instruction.
///
/// # Safety
/// `instruction + offset` must point at four readable bytes.
pub unsafe fn resolve_relative(instruction: usize, offset: usize, instruction_len: usize) -> usize {
    let displacement = std::ptr::read_unaligned((instruction + offset) as *const i32);
    relative_target(instruction, instruction_len, displacement)
}

/// Skips incremental-link thunks: while `address` starts with `JMP rel32`,
/// moves to the jump target. Gives up after a few hops.
///
/// # Safety
/// Every address on the chain must point at five readable bytes.
pub unsafe fn follow_jump_thunks(mut address: usize) -> usize {
    for _ in 0..4 {
        if std::ptr::read(address as *const u8) != JMP_REL32 {
            break;
        }
        address = resolve_relative(address, 1, 5);
    }
    address
}
