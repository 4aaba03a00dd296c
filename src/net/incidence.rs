//! 库所 × 变迁的稠密矩阵存储（输入、输出与净效应）。
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};

type SmallRow<T> = SmallVec<[T; 4]>;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Incidence<T> {
    rows: IndexVec<PlaceId, SmallRow<T>>,
    cols: usize,
}

impl<T: Clone> Incidence<T> {
    pub fn new(places: usize, transitions: usize, default: T) -> Self {
        let rows = (0..places)
            .map(|_| SmallRow::from_elem(default.clone(), transitions))
            .collect();
        Self {
            rows,
            cols: transitions,
        }
    }

    pub fn places(&self) -> usize {
        self.rows.len()
    }

    pub fn transitions(&self) -> usize {
        self.cols
    }

    pub fn get(&self, place: PlaceId, transition: TransitionId) -> &T {
        &self.rows[place][transition.index()]
    }

    pub fn get_mut(&mut self, place: PlaceId, transition: TransitionId) -> &mut T {
        &mut self.rows[place][transition.index()]
    }

    pub fn set(&mut self, place: PlaceId, transition: TransitionId, value: T) {
        self.rows[place][transition.index()] = value;
    }

    pub fn row(&self, place: PlaceId) -> &[T] {
        &self.rows[place]
    }

    /// Entries of one transition's column, in place order.
    pub fn column(&self, transition: TransitionId) -> impl Iterator<Item = (PlaceId, &T)> {
        self.rows
            .iter_enumerated()
            .map(move |(place, row)| (place, &row[transition.index()]))
    }

    pub fn map<U: Clone>(&self, mut f: impl FnMut(&T) -> U) -> Incidence<U> {
        let rows = self
            .rows
            .iter()
            .map(|row| row.iter().map(&mut f).collect::<SmallRow<_>>())
            .collect();
        Incidence {
            rows,
            cols: self.cols,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Incidence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incidence")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

impl Incidence<u64> {
    pub fn increment(&mut self, place: PlaceId, transition: TransitionId) {
        *self.get_mut(place, transition) += 1;
    }

    /// `self - other`, entrywise: with `self = Post` and `other = Pre` this is the effect matrix `C`.
    pub fn difference(&self, other: &Self) -> Incidence<i64> {
        assert_eq!(self.places(), other.places());
        assert_eq!(self.transitions(), other.transitions());
        let rows = self
            .rows
            .iter()
            .zip(other.rows.iter())
            .map(|(left, right)| {
                left.iter()
                    .zip(right.iter())
                    .map(|(l, r)| *l as i64 - *r as i64)
                    .collect::<SmallRow<_>>()
            })
            .collect();
        Incidence {
            rows,
            cols: self.cols,
        }
    }

    pub fn column_total(&self, transition: TransitionId) -> u64 {
        self.column(transition).map(|(_, w)| *w).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difference_is_post_minus_pre() {
        let p0 = PlaceId(0);
        let p1 = PlaceId(1);
        let t0 = TransitionId(0);

        let mut pre = Incidence::new(2, 1, 0u64);
        let mut post = Incidence::new(2, 1, 0u64);
        pre.increment(p0, t0);
        post.increment(p1, t0);
        post.increment(p1, t0);

        let effect = post.difference(&pre);
        assert_eq!(*effect.get(p0, t0), -1);
        assert_eq!(*effect.get(p1, t0), 2);
        assert_eq!(post.column_total(t0), 2);
        assert_eq!(
            effect.column(t0).map(|(_, v)| *v).collect::<Vec<_>>(),
            vec![-1, 2]
        );
    }
}
