//! Entity resolution
//!
//! An entity is the semantic type of a slot (date, city, ...). Skills register
//! a normalizer per entity type; slot access goes through the
//! [`EntityResolver`], which turns raw slot text into a canonical value.
//!
//! Resolution order for a slot:
//! 1. a value already resolved upstream by the NLU service
//! 2. the normalizer registered for the slot's entity type
//! 3. the raw extracted value
//!
//! A normalizer that fails or panics is logged and the raw extracted value is
//! returned instead.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::value_objects::Slot;

/// Turns a raw slot into a canonical value for one entity type
pub trait EntityNormalizer: Send + Sync {
    fn resolve(&self, slot: &Slot) -> anyhow::Result<Value>;
}

impl<F> EntityNormalizer for F
where
    F: Fn(&Slot) -> anyhow::Result<Value> + Send + Sync,
{
    fn resolve(&self, slot: &Slot) -> anyhow::Result<Value> {
        self(slot)
    }
}

/// Registry of entity normalizers keyed by entity type name
#[derive(Default)]
pub struct EntityResolver {
    normalizers: RwLock<HashMap<String, Arc<dyn EntityNormalizer>>>,
}

impl EntityResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a normalizer, replacing any earlier one for the same type
    pub fn register<N>(&self, entity_type: impl Into<String>, normalizer: N)
    where
        N: EntityNormalizer + 'static,
    {
        let entity_type = entity_type.into();
        let mut normalizers = self.normalizers.write().unwrap_or_else(PoisonError::into_inner);
        if normalizers.insert(entity_type.clone(), Arc::new(normalizer)).is_some() {
            debug!("Replaced entity normalizer for {}", entity_type);
        }
    }

    /// Whether a normalizer is registered for the entity type
    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.normalizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(entity_type)
    }

    /// Resolve a slot to its canonical value
    pub fn resolve(&self, slot: &Slot) -> Value {
        if let Some(resolved) = &slot.resolved {
            return resolved.clone();
        }

        let Some(normalizer) = slot.entity.as_deref().and_then(|entity| self.lookup(entity)) else {
            return slot.value.clone();
        };

        match catch_unwind(AssertUnwindSafe(|| normalizer.resolve(slot))) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(
                    "Entity normalizer for {:?} failed on slot {}: {:#}, using raw value",
                    slot.entity, slot.name, e
                );
                slot.value.clone()
            }
            Err(_) => {
                warn!(
                    "Entity normalizer for {:?} panicked on slot {}, using raw value",
                    slot.entity, slot.name
                );
                slot.value.clone()
            }
        }
    }

    // The lock is released before the normalizer runs
    fn lookup(&self, entity_type: &str) -> Option<Arc<dyn EntityNormalizer>> {
        self.normalizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned()
    }
}

impl std::fmt::Debug for EntityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let normalizers = self.normalizers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EntityResolver")
            .field("entity_types", &normalizers.keys().collect::<Vec<_>>())
            .finish()
    }
}
