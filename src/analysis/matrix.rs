//! 按 id 字典序排列的关联矩阵 `C = Post - Pre`，保证矩阵下标可复现。
use std::fmt;

use serde::Serialize;

use crate::net::Model;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncidenceMatrix {
    places: Vec<String>,
    transitions: Vec<String>,
    /// Row-major: `entries[place][transition]`.
    entries: Vec<Vec<i64>>,
}

impl IncidenceMatrix {
    /// Transition→place arcs add `+1`, place→transition arcs add `-1`, keyed or not.
    pub fn build(model: &Model) -> Self {
        let mut places: Vec<String> = model.places().iter().map(|p| p.id.clone()).collect();
        let mut transitions: Vec<String> =
            model.transitions().iter().map(|t| t.id.clone()).collect();
        places.sort();
        transitions.sort();

        let mut entries = vec![vec![0i64; transitions.len()]; places.len()];
        for flow in model.flows() {
            let place = &model.places()[flow.place].id;
            let transition = &model.transitions()[flow.transition].id;
            // ids come from the model itself, both searches succeed
            let (Ok(row), Ok(col)) = (
                places.binary_search(place),
                transitions.binary_search(transition),
            ) else {
                continue;
            };
            entries[row][col] += if flow.is_input() { -1 } else { 1 };
        }

        Self {
            places,
            transitions,
            entries,
        }
    }

    pub fn places(&self) -> &[String] {
        &self.places
    }

    pub fn transitions(&self) -> &[String] {
        &self.transitions
    }

    pub fn place_index(&self, place: &str) -> Option<usize> {
        self.places.binary_search_by(|p| p.as_str().cmp(place)).ok()
    }

    pub fn transition_index(&self, transition: &str) -> Option<usize> {
        self.transitions
            .binary_search_by(|t| t.as_str().cmp(transition))
            .ok()
    }

    pub fn get(&self, place: usize, transition: usize) -> i64 {
        self.entries[place][transition]
    }

    pub fn rows(&self) -> &[Vec<i64>] {
        &self.entries
    }

    pub fn column(&self, transition: usize) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(move |row| row[transition])
    }

    pub fn column_sum(&self, transition: usize) -> i64 {
        self.column(transition).sum()
    }

    /// A transition is conservative when it produces exactly as many tokens as it consumes.
    pub fn is_conservative(&self, transition: usize) -> bool {
        self.column_sum(transition) == 0
    }
}

impl fmt::Display for IncidenceMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .places
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(1);
        write!(f, "{:width$}", "", width = width)?;
        for transition in &self.transitions {
            write!(f, " {:>w$}", transition, w = transition.len().max(3))?;
        }
        writeln!(f)?;
        for (place, row) in self.places.iter().zip(&self.entries) {
            write!(f, "{:width$}", place, width = width)?;
            for (transition, value) in self.transitions.iter().zip(row) {
                write!(f, " {:>w$}", value, w = transition.len().max(3))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
