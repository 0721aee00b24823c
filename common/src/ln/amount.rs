//! Lightning amounts are carried as plain integers: `tokens` (whole
//! satoshis) and `mtokens` (millisatoshis). These helpers keep the
//! conversions in one place.

pub const MSATS_PER_SAT: u64 = 1_000;

/// Whole satoshis in `mtokens`, rounding down.
#[inline]
pub const fn tokens_from_mtokens(mtokens: u64) -> u64 {
    mtokens / MSATS_PER_SAT
}

/// `None` on overflow.
#[inline]
pub const fn mtokens_from_tokens(tokens: u64) -> Option<u64> {
    tokens.checked_mul(MSATS_PER_SAT)
}
