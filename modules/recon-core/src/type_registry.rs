//! The open event-type vocabulary's classification registry.
//!
//! `ROOT` is reserved. Types classified `ENTITY` are provenance anchors used
//! by entity-enrichment walks in the correlation engine and by the store's
//! `get_entities` convenience reads.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClassification {
    Entity,
    Internal,
    Data,
    SubEntity,
    Descriptor,
}

/// Maps event type names to their classification. Unregistered types are
/// treated as `Data`: the vocabulary is open, so an unknown type is never
/// an error, only an unclassified one.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    classifications: HashMap<String, TypeClassification>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: impl Into<String>, classification: TypeClassification) {
        self.classifications.insert(event_type.into(), classification);
    }

    pub fn classify(&self, event_type: &str) -> TypeClassification {
        self.classifications
            .get(event_type)
            .copied()
            .unwrap_or(TypeClassification::Data)
    }

    pub fn is_entity(&self, event_type: &str) -> bool {
        self.classify(event_type) == TypeClassification::Entity
    }

    pub fn is_entity_or_internal(&self, event_type: &str) -> bool {
        matches!(
            self.classify(event_type),
            TypeClassification::Entity | TypeClassification::Internal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_type_classifies_as_data() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.classify("SOME_NEW_TYPE"), TypeClassification::Data);
    }

    #[test]
    fn registered_entity_type_is_recognized() {
        let mut registry = TypeRegistry::new();
        registry.register("DOMAIN_NAME", TypeClassification::Entity);
        assert!(registry.is_entity("DOMAIN_NAME"));
        assert!(registry.is_entity_or_internal("DOMAIN_NAME"));
        assert!(!registry.is_entity("IP_ADDRESS"));
    }
}
