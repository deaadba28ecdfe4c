//! Token intervals with explicit bounds.

use std::fmt;

use num_bigint::BigInt;

use crate::routing::Token;

/// An interval of tokens with an explicit lower and upper bound, each
/// open or closed. Ranges never wrap: the ring splits its wrap-around
/// interval into two non-wrapping ranges before they get here.
///
/// Connectivity and intersection follow interval-cut semantics: two
/// ranges are connected iff some (possibly empty) range is enclosed by
/// both, so `(0, 5]` and `(5, 10]` are connected even though they share
/// no token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TokenRange {
    lower: Token,
    lower_inclusive: bool,
    upper: Token,
    upper_inclusive: bool,
}

impl TokenRange {
    /// `[lower, upper]`
    pub fn closed(lower: impl Into<Token>, upper: impl Into<Token>) -> Self {
        Self::new(lower.into(), true, upper.into(), true)
    }

    /// `(lower, upper]`
    pub fn open_closed(lower: impl Into<Token>, upper: impl Into<Token>) -> Self {
        Self::new(lower.into(), false, upper.into(), true)
    }

    /// `[lower, upper)`
    pub fn closed_open(lower: impl Into<Token>, upper: impl Into<Token>) -> Self {
        Self::new(lower.into(), true, upper.into(), false)
    }

    fn new(lower: Token, lower_inclusive: bool, upper: Token, upper_inclusive: bool) -> Self {
        debug_assert!(lower <= upper, "inverted token range");
        Self {
            lower,
            lower_inclusive,
            upper,
            upper_inclusive,
        }
    }

    pub fn lower(&self) -> &Token {
        &self.lower
    }

    pub fn upper(&self) -> &Token {
        &self.upper
    }

    pub fn is_lower_inclusive(&self) -> bool {
        self.lower_inclusive
    }

    pub fn is_upper_inclusive(&self) -> bool {
        self.upper_inclusive
    }

    /// A range is empty when it encloses no token at all, e.g. `(5, 5]`.
    pub fn is_empty(&self) -> bool {
        self.lower == self.upper && !(self.lower_inclusive && self.upper_inclusive)
    }

    pub fn contains(&self, token: &Token) -> bool {
        let above_lower = match self.lower.cmp(token) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.lower_inclusive,
            std::cmp::Ordering::Greater => false,
        };
        let below_upper = match token.cmp(&self.upper) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.upper_inclusive,
            std::cmp::Ordering::Greater => false,
        };
        above_lower && below_upper
    }

    // A bound maps onto a cut point on the token line: the cut sits just
    // below its token (0) or just above it (1). A range encloses the
    // tokens strictly between its lower and upper cut.
    fn lower_cut(&self) -> (&Token, u8) {
        (&self.lower, if self.lower_inclusive { 0 } else { 1 })
    }

    fn upper_cut(&self) -> (&Token, u8) {
        (&self.upper, if self.upper_inclusive { 1 } else { 0 })
    }

    /// Whether some (possibly empty) range is enclosed by both ranges.
    pub fn is_connected(&self, other: &TokenRange) -> bool {
        self.lower_cut() <= other.upper_cut() && other.lower_cut() <= self.upper_cut()
    }

    /// The largest range enclosed by both, if it contains at least one
    /// token.
    pub fn intersection(&self, other: &TokenRange) -> Option<TokenRange> {
        let (lower, lower_inclusive) = if self.lower_cut() >= other.lower_cut() {
            (&self.lower, self.lower_inclusive)
        } else {
            (&other.lower, other.lower_inclusive)
        };
        let (upper, upper_inclusive) = if self.upper_cut() <= other.upper_cut() {
            (&self.upper, self.upper_inclusive)
        } else {
            (&other.upper, other.upper_inclusive)
        };
        if lower > upper {
            return None;
        }
        let intersection = TokenRange::new(
            lower.clone(),
            lower_inclusive,
            upper.clone(),
            upper_inclusive,
        );
        if intersection.is_empty() {
            None
        } else {
            Some(intersection)
        }
    }

    /// Width of the interval, ignoring bound kinds; used to weight range
    /// splits, where the off-by-one is irrelevant.
    pub fn size(&self) -> BigInt {
        self.upper.value() - self.lower.value()
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}..{}{}",
            if self.lower_inclusive { '[' } else { '(' },
            self.lower,
            self.upper,
            if self.upper_inclusive { ']' } else { ')' },
        )
    }
}
