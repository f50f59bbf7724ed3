use rand::Rng;
use rand::seq::SliceRandom;

use super::list::SongList;

/// A random permutation of a list's valid indices, paired with its inverse.
///
/// Built lazily and anchored: the song playing when the order was built
/// comes first, so stepping forward never replays it before the rest.
#[derive(Debug, Clone)]
pub(super) struct ShuffleOrder {
    order: Vec<usize>,
    /// `inverse[index]` is the position of `index` in `order`.
    inverse: Vec<Option<usize>>,
}

impl ShuffleOrder {
    pub(super) fn build<R: Rng + ?Sized>(list: &SongList, anchor: Option<usize>, rng: &mut R) -> Self {
        let mut order: Vec<usize> = list.valid_indices().collect();
        order.shuffle(rng);
        if let Some(pos) = anchor.and_then(|a| order.iter().position(|&i| i == a)) {
            order.swap(0, pos);
        }

        let mut inverse = vec![None; list.len()];
        for (pos, &index) in order.iter().enumerate() {
            inverse[index] = Some(pos);
        }
        Self { order, inverse }
    }

    /// Whether this order was built for a list of the current size.
    pub(super) fn fits(&self, list: &SongList) -> bool {
        self.inverse.len() == list.len()
    }

    pub(super) fn position(&self, index: usize) -> Option<usize> {
        self.inverse.get(index).copied().flatten()
    }

    /// The first entry after position `pos` that is still valid.
    pub(super) fn valid_after(&self, pos: usize, list: &SongList) -> Option<usize> {
        self.order
            .iter()
            .skip(pos + 1)
            .copied()
            .find(|&i| list.is_valid(i))
    }

    pub(super) fn valid_before(&self, pos: usize, list: &SongList) -> Option<usize> {
        self.order[..pos.min(self.order.len())]
            .iter()
            .rev()
            .copied()
            .find(|&i| list.is_valid(i))
    }

    pub(super) fn first_valid(&self, list: &SongList) -> Option<usize> {
        self.order.iter().copied().find(|&i| list.is_valid(i))
    }

    pub(super) fn last_valid(&self, list: &SongList) -> Option<usize> {
        self.order.iter().rev().copied().find(|&i| list.is_valid(i))
    }
}
