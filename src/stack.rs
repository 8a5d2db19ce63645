//! Native stack growth for the recursive parts of evaluation.
//!
//! Nested evaluation is bounded by `Evaluator::max_depth`, not by the size of
//! the thread's stack. Every nested `eval` runs through
//! [`ensure_sufficient_stack`], which moves onto a freshly allocated segment
//! when the current one is close to exhausted.

/// Grow when less than this much stack is left (128KB).
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment (2MB).
const STACK_PER_SEGMENT: usize = 2 * 1024 * 1024;

#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_SEGMENT, f)
}
