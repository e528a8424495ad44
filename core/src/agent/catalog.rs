use crate::traits::ToolDescriptor;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct CatalogEntry {
    descriptor: ToolDescriptor,
    owner: usize,
}

/// Flat, name-keyed view over every connected provider's tools.
///
/// Iteration follows insertion order, so one provider's listing order is kept.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool owned by session `owner`. Returns `false` and keeps the
    /// existing entry when the name is already taken.
    pub fn insert(&mut self, descriptor: ToolDescriptor, owner: usize) -> bool {
        if self.index.contains_key(&descriptor.name) {
            return false;
        }
        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(CatalogEntry { descriptor, owner });
        true
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i].descriptor)
    }

    pub fn owner_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).map(|&i| self.entries[i].owner)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

impl FromIterator<ToolDescriptor> for ToolCatalog {
    /// Builds a catalog where every tool belongs to session 0.
    fn from_iter<T: IntoIterator<Item = ToolDescriptor>>(iter: T) -> Self {
        let mut catalog = Self::new();
        for descriptor in iter {
            catalog.insert(descriptor, 0);
        }
        catalog
    }
}
