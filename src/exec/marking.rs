//! 运行时标识：令牌库所的计数与数据库所的结构化值。
use std::collections::BTreeMap;
use std::fmt::{self, Write as FmtWrite};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::expr::Value;
use crate::net::{Idx, IndexVec, Model, PlaceId};

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Marking {
    tokens: IndexVec<PlaceId, i64>,
    /// Current value of every data place; token places have no entry.
    data: BTreeMap<PlaceId, Value>,
}

impl Marking {
    pub fn initial(model: &Model) -> Self {
        let mut data = BTreeMap::new();
        let tokens = model
            .places()
            .iter_enumerated()
            .map(|(place_id, place)| {
                if !place.is_token() {
                    data.insert(place_id, place.initial.clone());
                }
                place.initial_tokens().max(0)
            })
            .collect();
        Self { tokens, data }
    }

    pub fn tokens(&self, place: PlaceId) -> i64 {
        self.tokens[place]
    }

    pub fn tokens_mut(&mut self, place: PlaceId) -> &mut i64 {
        &mut self.tokens[place]
    }

    pub fn set_tokens(&mut self, place: PlaceId, count: i64) {
        self.tokens[place] = count;
    }

    /// Builder-style variant of [`Marking::set_tokens`], handy for reachability targets.
    pub fn with_tokens(mut self, place: PlaceId, count: i64) -> Self {
        self.set_tokens(place, count);
        self
    }

    pub fn data(&self, place: PlaceId) -> Option<&Value> {
        self.data.get(&place)
    }

    pub fn data_mut(&mut self, place: PlaceId) -> Option<&mut Value> {
        self.data.get_mut(&place)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn total_tokens(&self) -> i64 {
        self.tokens.iter().fold(0i64, |acc, t| acc.saturating_add(*t))
    }

    /// Value of a place as seen by guards and invariants.
    pub fn value(&self, place: PlaceId) -> Value {
        match self.data.get(&place) {
            Some(value) => value.clone(),
            None => Value::Int(self.tokens[place]),
        }
    }

    /// Every place bound by id, the binding set for invariant evaluation and aggregates.
    pub fn to_values(&self, model: &Model) -> BTreeMap<String, Value> {
        model
            .places()
            .iter_enumerated()
            .map(|(place_id, place)| (place.id.clone(), self.value(place_id)))
            .collect()
    }

    /// Unambiguous visited-set key: each entry is `<len>:<id>=<count>;`.
    pub fn state_key(&self, model: &Model) -> String {
        let mut key = String::new();
        for (place_id, place) in model.places().iter_enumerated() {
            let _ = write!(
                key,
                "{}:{}={};",
                place.id.len(),
                place.id,
                self.tokens[place_id]
            );
        }
        for (place_id, value) in &self.data {
            let encoded = value.to_string();
            let _ = write!(key, "#{}:{}:{};", place_id.index(), encoded.len(), encoded);
        }
        key
    }

    pub fn display<'a>(&'a self, model: &'a Model) -> MarkingDisplay<'a> {
        MarkingDisplay {
            marking: self,
            model,
        }
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.tokens.iter_enumerated())
            .entries(self.data.iter())
            .finish()
    }
}

pub struct MarkingDisplay<'a> {
    marking: &'a Marking,
    model: &'a Model,
}

impl fmt::Display for MarkingDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .model
            .places()
            .iter_enumerated()
            .format_with(", ", |(place_id, place), g| {
                g(&format_args!("{}: {}", place.id, self.marking.value(place_id)))
            });
        write!(f, "{{{}}}", entries)
    }
}
