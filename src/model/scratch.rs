//! Scratch-memory budget for evaluation calls.
//!
//! The evaluator reserves transient working memory up front for each
//! forward pass instead of discovering an allocation failure halfway
//! through. The arena records the per-token cost on the first call and
//! reserves `1.1 * per_token * n_tokens` bytes before every pass. The
//! reservation only ever grows.

use log::debug;

use crate::error::{Error, Result};

/// Reusable scratch budget owned by a generation context.
#[derive(Debug, Default)]
pub struct ScratchArena {
    buf: Vec<u8>,
    per_token: Option<usize>,
}

impl ScratchArena {
    /// Creates an empty arena. The per-token cost is established by the
    /// first evaluation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-token transient cost in bytes, once recorded.
    pub fn per_token(&self) -> Option<usize> {
        self.per_token
    }

    /// Records the per-token transient cost. Later calls keep the
    /// larger value.
    pub fn record_per_token(&mut self, bytes: usize) {
        let current = self.per_token.unwrap_or(0);
        if bytes > current {
            debug!("scratch cost: {bytes} bytes per token");
            self.per_token = Some(bytes);
        }
    }

    /// Currently reserved bytes.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Reserves the working memory for a pass over `n_tokens` tokens.
    ///
    /// Fails without touching the existing reservation when the
    /// allocator cannot satisfy the request.
    pub fn ensure(&mut self, n_tokens: usize) -> Result<()> {
        let per_token = match self.per_token {
            Some(b) => b,
            None => return Ok(()),
        };
        let need = per_token * n_tokens;
        let need = need + need / 10;
        if need <= self.buf.capacity() {
            return Ok(());
        }
        debug!("growing scratch reservation to {need} bytes");
        self.buf
            .try_reserve_exact(need)
            .map_err(|_| Error::OutOfMemory {
                what: "evaluation scratch",
                bytes: need,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_reservation_before_first_record() {
        let mut arena = ScratchArena::new();
        arena.ensure(64).unwrap();
        assert_eq!(arena.capacity(), 0);
        assert_eq!(arena.per_token(), None);
    }

    #[test]
    fn test_reservation_grows_with_tokens() {
        let mut arena = ScratchArena::new();
        arena.record_per_token(100);

        arena.ensure(1).unwrap();
        assert!(arena.capacity() >= 110);

        arena.ensure(8).unwrap();
        assert!(arena.capacity() >= 880);
    }

    #[test]
    fn test_reservation_never_shrinks() {
        let mut arena = ScratchArena::new();
        arena.record_per_token(100);

        arena.ensure(8).unwrap();
        let big = arena.capacity();

        arena.ensure(1).unwrap();
        assert_eq!(arena.capacity(), big);
    }

    #[test]
    fn test_per_token_keeps_maximum() {
        let mut arena = ScratchArena::new();
        arena.record_per_token(100);
        arena.record_per_token(50);
        assert_eq!(arena.per_token(), Some(100));
    }
}
