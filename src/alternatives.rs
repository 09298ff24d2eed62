//! Moves the player has already rejected in the current position.

use std::collections::HashSet;

use shakmaty::{Chess, Move, Position};
use tracing::debug;

/// Source of prepared moves, consulted before the engine is asked.
pub trait OpeningBook: Send + Sync {
    /// A book move for `position` that is not in `exclude`.
    fn choose(&self, position: &Chess, exclude: &HashSet<Move>) -> Option<Move>;
}

/// A book move and the reply the book expects to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMove {
    pub mv: Move,
    pub ponder: Option<Move>,
}

/// Exclusion set for "show me another move".
///
/// Cleared whenever a move is actually played, so it only ever refers to
/// the current position.
#[derive(Debug, Clone, Default)]
pub struct AlternativeMoves {
    excluded: HashSet<Move>,
}

impl AlternativeMoves {
    pub fn new() -> Self {
        Self::default()
    }

    /// Legal moves not yet excluded. Once every legal move has been
    /// rejected, the whole list is offered again.
    pub fn all(&self, position: &Chess) -> Vec<Move> {
        let legal = position.legal_moves();
        let remaining: Vec<Move> = legal
            .iter()
            .filter(|mv| !self.excluded.contains(*mv))
            .cloned()
            .collect();
        if remaining.is_empty() {
            legal.into_iter().collect()
        } else {
            remaining
        }
    }

    pub fn exclude(&mut self, mv: Move) {
        debug!(?mv, "excluding alternative");
        self.excluded.insert(mv);
    }

    pub fn is_excluded(&self, mv: &Move) -> bool {
        self.excluded.contains(mv)
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn reset(&mut self) {
        self.excluded.clear();
    }

    /// Asks `book` for a move outside the exclusion set and excludes it.
    pub fn book(&mut self, book: &dyn OpeningBook, position: &Chess) -> Option<BookMove> {
        let mv = book.choose(position, &self.excluded)?;
        self.exclude(mv.clone());
        let mut next = position.clone();
        next.play_unchecked(&mv);
        let ponder = book.choose(&next, &HashSet::new());
        Some(BookMove { mv, ponder })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FirstLegal;

    impl OpeningBook for FirstLegal {
        fn choose(&self, position: &Chess, exclude: &HashSet<Move>) -> Option<Move> {
            position
                .legal_moves()
                .into_iter()
                .find(|mv| !exclude.contains(mv))
        }
    }

    #[test]
    fn exclusion_shrinks_choices() {
        let pos = Chess::default();
        let mut alt = AlternativeMoves::new();
        assert_eq!(alt.all(&pos).len(), 20);
        let first = alt.all(&pos)[0].clone();
        alt.exclude(first.clone());
        let rest = alt.all(&pos);
        assert_eq!(rest.len(), 19);
        assert!(!rest.contains(&first));
        alt.reset();
        assert!(alt.is_empty());
    }

    #[test]
    fn exhausted_list_starts_over() {
        let pos = Chess::default();
        let mut alt = AlternativeMoves::new();
        for mv in pos.legal_moves() {
            alt.exclude(mv);
        }
        assert_eq!(alt.all(&pos).len(), 20);
    }

    #[test]
    fn book_moves_are_excluded_after_use() {
        let pos = Chess::default();
        let mut alt = AlternativeMoves::new();
        let first = alt.book(&FirstLegal, &pos).unwrap();
        let second = alt.book(&FirstLegal, &pos).unwrap();
        assert_ne!(first.mv, second.mv);
        assert!(first.ponder.is_some());
        assert_eq!(alt.len(), 2);
    }
}
