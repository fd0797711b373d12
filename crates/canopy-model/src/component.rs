//! Fault tree and component containers
//!
//! A component is a named scope: it records which entities were declared
//! inside it and nests child components. The dot-joined path from the fault
//! tree root down to a component is the `base_path` of everything declared
//! there, which is all the resolver needs; the containers themselves exist
//! for structure and reporting.

use indexmap::IndexMap;

use crate::error::{ModelError, Result};

/// One level of the declaration hierarchy
///
/// A fault tree is simply the root component of its hierarchy.
#[derive(Debug, Clone, Default)]
pub struct Component {
    /// Case-preserving display name
    pub name: String,
    /// Lowercase path segment
    pub id: String,
    /// Lowercase ids of entities declared directly in this scope
    pub gates: Vec<String>,
    pub basic_events: Vec<String>,
    pub house_events: Vec<String>,
    pub parameters: Vec<String>,
    pub ccf_groups: Vec<String>,
    /// Nested components, keyed by lowercase segment
    pub children: IndexMap<String, Component>,
}

impl Component {
    pub fn new(name: &str) -> Self {
        let name = name.trim().to_string();
        let id = name.to_lowercase();
        Self {
            name,
            id,
            ..Self::default()
        }
    }

    /// Nests a child component, rejecting duplicate segments.
    pub fn add_component(&mut self, child: Component) -> Result<()> {
        if self.children.contains_key(&child.id) {
            return Err(ModelError::Redefinition {
                kind: "component",
                id: child.id,
            });
        }
        self.children.insert(child.id.clone(), child);
        Ok(())
    }

    /// Finds a nested component by its dot-joined relative path.
    pub fn find(&self, relative_path: &str) -> Option<&Component> {
        let mut current = self;
        for segment in relative_path.split('.') {
            current = current.children.get(&segment.trim().to_lowercase())?;
        }
        Some(current)
    }

    /// Declared entity count across this scope only.
    pub fn declared_count(&self) -> usize {
        self.gates.len()
            + self.basic_events.len()
            + self.house_events.len()
            + self.parameters.len()
            + self.ccf_groups.len()
    }
}
