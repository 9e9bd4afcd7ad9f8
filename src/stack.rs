//! Host stack growth for the recursive parser and evaluator.
//!
//! Deeply nested source recurses once per level in both the parser and the
//! evaluator; `stacker` moves that recursion onto fresh heap segments before
//! the thread's own stack runs out.

/// Minimum stack to keep free before descending another level.
const RED_ZONE: usize = 256 * 1024;

/// Size of each extra stack segment.
const STACK_PER_RECURSION: usize = 4 * 1024 * 1024;

#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
