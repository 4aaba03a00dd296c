//! 经过校验、构建后不可变的模型。分析只会派生删除/扰动单个元素后的副本。
use std::collections::HashSet;
use std::fmt::{self, Write as FmtWrite};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::incidence::Incidence;
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{Arc, ArcDirection, FlowArc, Invariant, Place, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("{kind} #{index} has an empty id")]
    EmptyId { kind: &'static str, index: usize },
    #[error("duplicate place id `{0}`")]
    DuplicatePlace(String),
    #[error("duplicate transition id `{0}`")]
    DuplicateTransition(String),
    #[error("duplicate invariant id `{0}`")]
    DuplicateInvariant(String),
    #[error("id `{0}` names both a place and a transition")]
    AmbiguousId(String),
    #[error("arc #{index} references unknown node `{id}`")]
    UnknownEndpoint { index: usize, id: String },
    #[error("arc #{index} connects {kind} `{source_id}` to {kind} `{target_id}`")]
    SameKindArc {
        index: usize,
        kind: &'static str,
        source_id: String,
        target_id: String,
    },
    #[error("arc #{index} is keyed but `{place}` is a token place")]
    KeyedTokenPlace { index: usize, place: String },
    #[error("unknown {kind} `{id}`")]
    UnknownElement { kind: &'static str, id: String },
    #[error("arc index {0} is out of range")]
    ArcOutOfRange(usize),
}

/// Serialized form of a model; converted into a [`Model`] only through validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub places: Vec<Place>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub arcs: Vec<Arc>,
    #[serde(default)]
    pub invariants: Vec<Invariant>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "ModelDocument", into = "ModelDocument")]
pub struct Model {
    name: String,
    version: String,
    places: IndexVec<PlaceId, Place>,
    transitions: IndexVec<TransitionId, Transition>,
    arcs: Vec<Arc>,
    flows: Vec<FlowArc>,
    invariants: Vec<Invariant>,
    place_lookup: IndexMap<String, PlaceId>,
    transition_lookup: IndexMap<String, TransitionId>,
    pre: Incidence<u64>,
    post: Incidence<u64>,
    unkeyed_pre: Incidence<u64>,
    unkeyed_post: Incidence<u64>,
}

impl TryFrom<ModelDocument> for Model {
    type Error = ModelError;

    fn try_from(document: ModelDocument) -> Result<Self, Self::Error> {
        Model::new(document)
    }
}

impl From<Model> for ModelDocument {
    fn from(model: Model) -> Self {
        model.to_document()
    }
}

impl Model {
    pub fn new(document: ModelDocument) -> Result<Self, ModelError> {
        let ModelDocument {
            name,
            version,
            places,
            transitions,
            arcs,
            invariants,
        } = document;

        let mut place_lookup = IndexMap::new();
        for (index, place) in places.iter().enumerate() {
            if place.id.is_empty() {
                return Err(ModelError::EmptyId {
                    kind: "place",
                    index,
                });
            }
            if place_lookup
                .insert(place.id.clone(), PlaceId::from_usize(index))
                .is_some()
            {
                return Err(ModelError::DuplicatePlace(place.id.clone()));
            }
        }

        let mut transition_lookup = IndexMap::new();
        for (index, transition) in transitions.iter().enumerate() {
            if transition.id.is_empty() {
                return Err(ModelError::EmptyId {
                    kind: "transition",
                    index,
                });
            }
            if place_lookup.contains_key(&transition.id) {
                return Err(ModelError::AmbiguousId(transition.id.clone()));
            }
            if transition_lookup
                .insert(transition.id.clone(), TransitionId::from_usize(index))
                .is_some()
            {
                return Err(ModelError::DuplicateTransition(transition.id.clone()));
            }
        }

        let mut invariant_ids = HashSet::new();
        for (index, invariant) in invariants.iter().enumerate() {
            if invariant.id.is_empty() {
                return Err(ModelError::EmptyId {
                    kind: "invariant",
                    index,
                });
            }
            if !invariant_ids.insert(invariant.id.as_str()) {
                return Err(ModelError::DuplicateInvariant(invariant.id.clone()));
            }
        }

        let places: IndexVec<PlaceId, Place> = places.into();
        let transitions: IndexVec<TransitionId, Transition> = transitions.into();
        let mut pre = Incidence::new(places.len(), transitions.len(), 0u64);
        let mut post = Incidence::new(places.len(), transitions.len(), 0u64);
        let mut unkeyed_pre = pre.clone();
        let mut unkeyed_post = post.clone();

        let mut flows = Vec::with_capacity(arcs.len());
        for (index, arc) in arcs.iter().enumerate() {
            let flow = resolve_arc(index, arc, &place_lookup, &transition_lookup)?;
            if flow.keyed && places[flow.place].is_token() {
                return Err(ModelError::KeyedTokenPlace {
                    index,
                    place: places[flow.place].id.clone(),
                });
            }
            let (matrix, unkeyed) = match flow.direction {
                ArcDirection::PlaceToTransition => (&mut pre, &mut unkeyed_pre),
                ArcDirection::TransitionToPlace => (&mut post, &mut unkeyed_post),
            };
            matrix.increment(flow.place, flow.transition);
            if !flow.keyed {
                unkeyed.increment(flow.place, flow.transition);
            }
            flows.push(flow);
        }

        log::debug!(
            "model `{}`: {} places, {} transitions, {} arcs, {} invariants",
            name,
            places.len(),
            transitions.len(),
            arcs.len(),
            invariants.len()
        );

        Ok(Self {
            name,
            version,
            places,
            transitions,
            arcs,
            flows,
            invariants,
            place_lookup,
            transition_lookup,
            pre,
            post,
            unkeyed_pre,
            unkeyed_post,
        })
    }

    pub fn to_document(&self) -> ModelDocument {
        ModelDocument {
            name: self.name.clone(),
            version: self.version.clone(),
            places: self.places.iter().cloned().collect(),
            transitions: self.transitions.iter().cloned().collect(),
            arcs: self.arcs.clone(),
            invariants: self.invariants.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn places(&self) -> &IndexVec<PlaceId, Place> {
        &self.places
    }

    pub fn transitions(&self) -> &IndexVec<TransitionId, Transition> {
        &self.transitions
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    /// Resolved arcs, parallel to [`Model::arcs`].
    pub fn flows(&self) -> &[FlowArc] {
        &self.flows
    }

    pub fn invariants(&self) -> &[Invariant] {
        &self.invariants
    }

    pub fn place_id(&self, id: &str) -> Option<PlaceId> {
        self.place_lookup.get(id).copied()
    }

    pub fn transition_id(&self, id: &str) -> Option<TransitionId> {
        self.transition_lookup.get(id).copied()
    }

    pub fn place(&self, id: &str) -> Option<&Place> {
        self.place_id(id).map(|idx| &self.places[idx])
    }

    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transition_id(id).map(|idx| &self.transitions[idx])
    }

    /// Input multiplicities over all arcs (keyed included).
    pub fn pre(&self) -> &Incidence<u64> {
        &self.pre
    }

    pub fn post(&self) -> &Incidence<u64> {
        &self.post
    }

    /// Input multiplicities over unkeyed arcs only; these gate raw firing.
    pub fn unkeyed_pre(&self) -> &Incidence<u64> {
        &self.unkeyed_pre
    }

    pub fn unkeyed_post(&self) -> &Incidence<u64> {
        &self.unkeyed_post
    }

    /// Saturates at `i64::MAX` / `i64::MIN`.
    pub fn total_initial_tokens(&self) -> i64 {
        self.places
            .iter()
            .map(Place::initial_tokens)
            .fold(0i64, i64::saturating_add)
    }

    pub fn input_places(&self, transition: TransitionId) -> impl Iterator<Item = PlaceId> + '_ {
        self.pre
            .column(transition)
            .filter(|(_, w)| **w > 0)
            .map(|(place, _)| place)
    }

    pub fn output_places(&self, transition: TransitionId) -> impl Iterator<Item = PlaceId> + '_ {
        self.post
            .column(transition)
            .filter(|(_, w)| **w > 0)
            .map(|(place, _)| place)
    }

    /// Copy with one place and every arc touching it removed.
    pub fn without_place(&self, id: &str) -> Result<Model, ModelError> {
        if self.place_id(id).is_none() {
            return Err(ModelError::UnknownElement {
                kind: "place",
                id: id.to_string(),
            });
        }
        let mut document = self.to_document();
        document.places.retain(|place| place.id != id);
        document.arcs.retain(|arc| arc.source != id && arc.target != id);
        Model::new(document)
    }

    /// Copy with one transition and every arc touching it removed.
    pub fn without_transition(&self, id: &str) -> Result<Model, ModelError> {
        if self.transition_id(id).is_none() {
            return Err(ModelError::UnknownElement {
                kind: "transition",
                id: id.to_string(),
            });
        }
        let mut document = self.to_document();
        document.transitions.retain(|transition| transition.id != id);
        document.arcs.retain(|arc| arc.source != id && arc.target != id);
        Model::new(document)
    }

    pub fn without_arc(&self, index: usize) -> Result<Model, ModelError> {
        if index >= self.arcs.len() {
            return Err(ModelError::ArcOutOfRange(index));
        }
        let mut document = self.to_document();
        document.arcs.remove(index);
        Model::new(document)
    }

    pub fn with_rate(&self, transition: &str, rate: f64) -> Result<Model, ModelError> {
        let idx = self
            .transition_id(transition)
            .ok_or_else(|| ModelError::UnknownElement {
                kind: "transition",
                id: transition.to_string(),
            })?;
        let mut model = self.clone();
        model.transitions[idx].rate = rate;
        Ok(model)
    }

    pub fn with_initial_tokens(&self, place: &str, tokens: i64) -> Result<Model, ModelError> {
        let idx = self
            .place_id(place)
            .ok_or_else(|| ModelError::UnknownElement {
                kind: "place",
                id: place.to_string(),
            })?;
        let mut model = self.clone();
        model.places[idx].initial = tokens.into();
        Ok(model)
    }

    /// Label for arc `index`, e.g. `P1->forward`.
    pub fn arc_label(&self, index: usize) -> String {
        let arc = &self.arcs[index];
        format!("{}->{}", arc.source, arc.target)
    }

    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(&mut dot, "digraph \"{}\" {{", escape_label(&self.name));
        let _ = writeln!(&mut dot, "    rankdir=LR;");
        let _ = writeln!(&mut dot, "    node [fontname=\"Helvetica\"];");

        for (place_id, place) in self.places.iter_enumerated() {
            let label = format!("{}\\n{}", escape_label(&place.id), escape_label(&place.initial.to_string()));
            let _ = writeln!(
                &mut dot,
                "    place_{} [label=\"{}\", shape=circle, style=filled, fillcolor=\"#e3f2fd\"];",
                place_id.index(),
                label
            );
        }

        for (transition_id, transition) in self.transitions.iter_enumerated() {
            let mut label = escape_label(&transition.id);
            if let Some(guard) = &transition.guard {
                label.push_str("\\n[");
                label.push_str(&escape_label(guard));
                label.push(']');
            }
            let _ = writeln!(
                &mut dot,
                "    trans_{} [label=\"{}\", shape=box, style=filled, fillcolor=\"#ffe0b2\"];",
                transition_id.index(),
                label
            );
        }

        for (flow, arc) in self.flows.iter().zip(self.arcs.iter()) {
            let place = format!("place_{}", flow.place.index());
            let transition = format!("trans_{}", flow.transition.index());
            let (from, to) = if flow.is_input() {
                (place, transition)
            } else {
                (transition, place)
            };
            if arc.keys.is_empty() {
                let _ = writeln!(&mut dot, "    {} -> {};", from, to);
            } else {
                let _ = writeln!(
                    &mut dot,
                    "    {} -> {} [label=\"[{}]\", style=dashed];",
                    from,
                    to,
                    escape_label(&arc.keys.join("]["))
                );
            }
        }

        let _ = writeln!(&mut dot, "}}");
        dot
    }

    /// 连通性诊断：孤立节点、永远无法获得 token 的库所、无前置库所的变迁。
    pub fn diagnose(&self) -> DiagnosticReport {
        let mut isolated_places = Vec::new();
        let mut isolated_transitions = Vec::new();
        let mut warnings = Vec::new();

        for (place_id, place) in self.places.iter_enumerated() {
            let has_input = self.post.row(place_id).iter().any(|w| *w > 0);
            let has_output = self.pre.row(place_id).iter().any(|w| *w > 0);

            if !has_input && !has_output {
                isolated_places.push(place.id.clone());
            } else if !has_input && place.is_token() && place.initial_tokens() == 0 {
                warnings.push(format!(
                    "place `{}` has no producing transition and starts empty; it never holds tokens",
                    place.id
                ));
            }
        }

        for (transition_id, transition) in self.transitions.iter_enumerated() {
            let has_preset = self.input_places(transition_id).next().is_some();
            let has_postset = self.output_places(transition_id).next().is_some();

            if !has_preset && !has_postset {
                isolated_transitions.push(transition.id.clone());
            } else if !has_preset {
                warnings.push(format!(
                    "transition `{}` has no input places; it can fire without bound",
                    transition.id
                ));
            } else if !has_postset {
                warnings.push(format!(
                    "transition `{}` has no output places; it only consumes",
                    transition.id
                ));
            }
        }

        DiagnosticReport {
            isolated_places,
            isolated_transitions,
            warnings,
            total_places: self.places.len(),
            total_transitions: self.transitions.len(),
        }
    }

    pub fn log_diagnostics(&self) {
        let report = self.diagnose();
        if !report.has_issues() {
            log::info!("model `{}`: connectivity check passed", self.name);
            return;
        }
        log::warn!("=== 连通性诊断: {} ===", self.name);
        for id in &report.isolated_places {
            log::warn!("  isolated place `{}`", id);
        }
        for id in &report.isolated_transitions {
            log::warn!("  isolated transition `{}`", id);
        }
        for warning in &report.warnings {
            log::warn!("  {}", warning);
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("places", &self.places)
            .field("transitions", &self.transitions)
            .field("arcs", &self.arcs)
            .field("invariants", &self.invariants)
            .finish()
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.to_document() == other.to_document()
    }
}

fn resolve_arc(
    index: usize,
    arc: &Arc,
    places: &IndexMap<String, PlaceId>,
    transitions: &IndexMap<String, TransitionId>,
) -> Result<FlowArc, ModelError> {
    let unknown = |id: &str| ModelError::UnknownEndpoint {
        index,
        id: id.to_string(),
    };
    let same_kind = |kind| ModelError::SameKindArc {
        index,
        kind,
        source_id: arc.source.clone(),
        target_id: arc.target.clone(),
    };

    let source_place = places.get(&arc.source).copied();
    let source_transition = transitions.get(&arc.source).copied();
    let target_place = places.get(&arc.target).copied();
    let target_transition = transitions.get(&arc.target).copied();

    if source_place.is_none() && source_transition.is_none() {
        return Err(unknown(&arc.source));
    }
    if target_place.is_none() && target_transition.is_none() {
        return Err(unknown(&arc.target));
    }

    let (place, transition, direction) = match (
        source_place,
        source_transition,
        target_place,
        target_transition,
    ) {
        (Some(place), _, _, Some(transition)) => {
            (place, transition, ArcDirection::PlaceToTransition)
        }
        (_, Some(transition), Some(place), _) => {
            (place, transition, ArcDirection::TransitionToPlace)
        }
        (Some(_), _, Some(_), _) => return Err(same_kind("place")),
        _ => return Err(same_kind("transition")),
    };

    Ok(FlowArc {
        place,
        transition,
        direction,
        keyed: arc.is_keyed(),
    })
}

/// 连通性诊断报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub isolated_places: Vec<String>,
    pub isolated_transitions: Vec<String>,
    pub warnings: Vec<String>,
    pub total_places: usize,
    pub total_transitions: usize,
}

impl DiagnosticReport {
    pub fn has_issues(&self) -> bool {
        !self.isolated_places.is_empty()
            || !self.isolated_transitions.is_empty()
            || !self.warnings.is_empty()
    }
}

fn escape_label(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
