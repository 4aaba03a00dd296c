use crate::net::model::{Model, ModelDocument, ModelError};
use crate::net::structure::{Arc, Invariant, Place, Transition};

/// Fluent construction of a [`Model`]; nothing is checked until [`ModelBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    document: ModelDocument,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            document: ModelDocument {
                name: name.into(),
                ..ModelDocument::default()
            },
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.document.version = version.into();
        self
    }

    pub fn place(mut self, place: Place) -> Self {
        self.document.places.push(place);
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.document.transitions.push(transition);
        self
    }

    pub fn arc(mut self, arc: Arc) -> Self {
        self.document.arcs.push(arc);
        self
    }

    /// Plain unkeyed arc between two ids.
    pub fn flow(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.arc(Arc::new(source, target))
    }

    pub fn invariant(mut self, id: impl Into<String>, expression: impl Into<String>) -> Self {
        self.document.invariants.push(Invariant::new(id, expression));
        self
    }

    pub fn build(self) -> Result<Model, ModelError> {
        Model::new(self.document)
    }
}

impl From<ModelDocument> for ModelBuilder {
    fn from(document: ModelDocument) -> Self {
        Self { document }
    }
}
