//! Collection naming.
//!
//! Every category maps to exactly one vector collection. The global
//! collection is implicitly included whenever categories are queried; the
//! legacy collection is used only when a request names no categories.

use std::fmt;

use crate::defaults::{CATEGORY_COLLECTION_PREFIX, GLOBAL_COLLECTION, LEGACY_COLLECTION};

/// Logical reference to a vector collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionRef {
    /// Per-category collection, identified by category slug.
    Category(String),
    /// Shared knowledge visible to every category.
    Global,
    /// Default collection for requests without categories.
    Legacy,
}

impl CollectionRef {
    /// Physical collection name in the vector store.
    pub fn collection_name(&self) -> String {
        match self {
            CollectionRef::Category(slug) => format!("{}{}", CATEGORY_COLLECTION_PREFIX, slug),
            CollectionRef::Global => GLOBAL_COLLECTION.to_string(),
            CollectionRef::Legacy => LEGACY_COLLECTION.to_string(),
        }
    }

    /// Parse a physical collection name back into a reference.
    pub fn from_collection_name(name: &str) -> Option<Self> {
        if name == GLOBAL_COLLECTION {
            return Some(CollectionRef::Global);
        }
        if name == LEGACY_COLLECTION {
            return Some(CollectionRef::Legacy);
        }
        name.strip_prefix(CATEGORY_COLLECTION_PREFIX)
            .filter(|slug| !slug.is_empty())
            .map(|slug| CollectionRef::Category(slug.to_string()))
    }

    /// Collections probed for a request.
    ///
    /// With categories: one collection per distinct category (in request
    /// order) followed by the global collection. Without categories (or with
    /// an empty list): the legacy collection only.
    pub fn for_categories(category_slugs: Option<&[String]>) -> Vec<CollectionRef> {
        match category_slugs {
            Some(slugs) if !slugs.is_empty() => {
                let mut refs: Vec<CollectionRef> = Vec::with_capacity(slugs.len() + 1);
                for slug in slugs {
                    let r = CollectionRef::Category(slug.clone());
                    if !refs.contains(&r) {
                        refs.push(r);
                    }
                }
                refs.push(CollectionRef::Global);
                refs
            }
            _ => vec![CollectionRef::Legacy],
        }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection_name())
    }
}
