//! Catalog collaborator
//!
//! The catalog service owns projects; the order engine only needs price,
//! owner and status at order creation.

use crate::types::{ProjectListing, ProjectStatus};
use credit_ledger::ProjectId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// Source of project listings
pub trait ProjectCatalog: Send + Sync + fmt::Debug {
    /// Look up a project
    fn project(&self, id: ProjectId) -> Option<ProjectListing>;
}

/// In-process catalog for tests and tooling
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    projects: RwLock<HashMap<ProjectId, ProjectListing>>,
}

impl InMemoryCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a listing
    pub fn upsert(&self, listing: ProjectListing) {
        self.projects.write().insert(listing.id, listing);
    }

    /// Change a listing's status; returns false if unknown
    pub fn set_status(&self, id: ProjectId, status: ProjectStatus) -> bool {
        match self.projects.write().get_mut(&id) {
            Some(listing) => {
                listing.status = status;
                true
            }
            None => false,
        }
    }

    /// Number of listings
    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }
}

impl ProjectCatalog for InMemoryCatalog {
    fn project(&self, id: ProjectId) -> Option<ProjectListing> {
        self.projects.read().get(&id).cloned()
    }
}
