//! Declarative catalog of grammatical relations (spec §4.9).
//!
//! The registry is the sole authority for what relations are surfaced to a
//! query; `QueryExecutor` never hard-codes relation semantics. A relation's
//! collocate predicate is expressed as a tag-class glob, deliberately not
//! the CQL dialect (out of scope).

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::token::PosGroup;

/// Opaque predicate over a collocate's POS tag, the only thing the
/// executor is allowed to hard-code a shape for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagClassPredicate {
    /// Matches any collocate whose tag maps to this broad group.
    Group(PosGroup),
    /// Matches every collocate, regardless of tag.
    Any,
}

impl TagClassPredicate {
    pub fn matches(&self, tag: &str) -> bool {
        match self {
            TagClassPredicate::Any => true,
            TagClassPredicate::Group(group) => PosGroup::from_tag(tag) == *group,
        }
    }
}

/// One entry in the catalog: id, display name, the head's required POS
/// group, the collocate predicate, and a free-form category label used
/// only for display (spec §4.9). `String`-valued rather than `&'static
/// str` so the CLI can deserialize a custom catalog from a config file at
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDef {
    pub id: String,
    pub display_name: String,
    pub head_group: PosGroup,
    pub collocate_predicate: TagClassPredicate,
    pub category: String,
}

static DEFAULT_CATALOG: Lazy<Vec<RelationDef>> = Lazy::new(|| {
    vec![
        RelationDef {
            id: "modifier".to_string(),
            display_name: "modifiers".to_string(),
            head_group: PosGroup::Noun,
            collocate_predicate: TagClassPredicate::Group(PosGroup::Adj),
            category: "noun→modifier".to_string(),
        },
        RelationDef {
            id: "object_of".to_string(),
            display_name: "objects".to_string(),
            head_group: PosGroup::Verb,
            collocate_predicate: TagClassPredicate::Group(PosGroup::Noun),
            category: "verb→object".to_string(),
        },
        RelationDef {
            id: "verb_with".to_string(),
            display_name: "verbs".to_string(),
            head_group: PosGroup::Noun,
            collocate_predicate: TagClassPredicate::Group(PosGroup::Verb),
            category: "noun→verb".to_string(),
        },
        RelationDef {
            id: "and_or".to_string(),
            display_name: "and/or".to_string(),
            head_group: PosGroup::Noun,
            collocate_predicate: TagClassPredicate::Group(PosGroup::Noun),
            category: "noun→coordinate".to_string(),
        },
        RelationDef {
            id: "any".to_string(),
            display_name: "all collocates".to_string(),
            head_group: PosGroup::Other,
            collocate_predicate: TagClassPredicate::Any,
            category: "any→any".to_string(),
        },
    ]
});

/// A loaded catalog of relations. Constructed from the built-in default or
/// from a small config file the CLI reads; the executor only ever sees
/// this type, never the raw predicates.
pub struct RelationRegistry {
    relations: Vec<RelationDef>,
}

impl Default for RelationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RelationRegistry {
    /// The built-in default catalog (spec §4.9 example categories).
    pub fn builtin() -> Self {
        RelationRegistry { relations: DEFAULT_CATALOG.clone() }
    }

    /// Builds a registry from an explicit list, e.g. loaded from a TOML or
    /// JSON config by the CLI. Adding a relation requires only appending an
    /// entry here — no executor changes.
    pub fn from_relations(relations: Vec<RelationDef>) -> Self {
        RelationRegistry { relations }
    }

    pub fn get(&self, id: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.id == id)
    }

    /// Loads a registry from a JSON array of `RelationDef`s, e.g. a small
    /// config file the CLI reads to override the built-in catalog
    /// (spec.md §9: "overridable by loading a small TOML/JSON config").
    pub fn from_json(bytes: &[u8]) -> crate::error::Result<Self> {
        let relations: Vec<RelationDef> = serde_json::from_slice(bytes)
            .map_err(|e| crate::error::UserError::InvalidInput(e.to_string()))?;
        Ok(RelationRegistry { relations })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.iter()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_every_documented_category() {
        let registry = RelationRegistry::builtin();
        assert!(registry.get("modifier").is_some());
        assert!(registry.get("object_of").is_some());
        assert!(registry.get("any").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn tag_class_predicate_matches_broad_group() {
        let pred = TagClassPredicate::Group(PosGroup::Adj);
        assert!(pred.matches("JJ"));
        assert!(!pred.matches("NN"));
        assert!(TagClassPredicate::Any.matches("anything"));
    }

    #[test]
    fn custom_registry_overrides_the_builtin_catalog() {
        let custom = RelationRegistry::from_relations(vec![RelationDef {
            id: "custom".to_string(),
            display_name: "custom".to_string(),
            head_group: PosGroup::Noun,
            collocate_predicate: TagClassPredicate::Any,
            category: "custom".to_string(),
        }]);
        assert_eq!(custom.len(), 1);
        assert!(custom.get("modifier").is_none());
    }

    #[test]
    fn loads_a_custom_catalog_from_json() {
        let json = br#"[
            {"id": "custom", "display_name": "Custom", "head_group": "Noun",
             "collocate_predicate": "Any", "category": "custom"}
        ]"#;
        let registry = RelationRegistry::from_json(json).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("custom").unwrap().head_group, PosGroup::Noun);
    }
}
