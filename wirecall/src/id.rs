use std::sync::{
    Mutex,
    atomic::{AtomicU32, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::msg::Id;

/// Which kind of identifiers a client issues.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Copy, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// `1, 2, 3, ...`
    Numeric,
    /// `"0", "1", ..., "9", "10", ...`
    Lexical,
}

/// Request id sequence owned by one client.
///
/// The numeric sequence starts at 1 and wraps from `u32::MAX` back to 1,
/// so 0 is never issued. The lexical sequence starts at `"0"` and advances
/// by decimal digit-string successor.
#[derive(Debug)]
pub enum IdGenerator {
    Numeric(AtomicU32),
    Lexical(Mutex<String>),
}

impl IdGenerator {
    #[must_use]
    pub fn new(kind: IdKind) -> Self {
        match kind {
            IdKind::Numeric => IdGenerator::Numeric(AtomicU32::new(1)),
            IdKind::Lexical => IdGenerator::Lexical(Mutex::new("0".to_string())),
        }
    }

    pub fn next(&self) -> Id {
        match self {
            IdGenerator::Numeric(counter) => {
                let mut id = counter.fetch_add(1, Ordering::AcqRel);
                if id == 0 {
                    id = counter.fetch_add(1, Ordering::AcqRel);
                }
                Id::Num(i64::from(id))
            }
            IdGenerator::Lexical(current) => {
                // a poisoned lock still holds a valid digit string.
                let mut current = current
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let id = successor(&current);
                Id::Str(std::mem::replace(&mut *current, id))
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(IdKind::Numeric)
    }
}

fn successor(token: &str) -> String {
    let mut digits = token.as_bytes().to_vec();
    for digit in digits.iter_mut().rev() {
        if *digit == b'9' {
            *digit = b'0';
        } else {
            *digit += 1;
            return String::from_utf8_lossy(&digits).into_owned();
        }
    }
    digits.insert(0, b'1');
    String::from_utf8_lossy(&digits).into_owned()
}
