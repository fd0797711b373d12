//! Fault tree primitives: basic events, house events, gates
//!
//! The three kinds share one case-insensitive identifier space. Identity is
//! carried by [`Identity`]: the display name keeps the author's casing, the
//! id is the lowercase lookup key, and non-public entities qualify the id
//! with the path of the container that declares them.

use crate::expr::ExprId;

/// Visibility of a named entity within the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Reachable by bare name from any scope
    Public,
    /// Reachable only through its declaring path
    Private,
}

/// Naming data common to events, gates, parameters, and CCF groups
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Case-preserving display name
    pub name: String,
    /// Lowercase lookup key; qualified with `base_path` for private entities
    pub id: String,
    /// Dot-joined path of the declaring container, empty at model level
    pub base_path: String,
    pub role: Role,
}

impl Identity {
    pub fn new(name: &str, base_path: &str, role: Role) -> Self {
        let name = name.trim().to_string();
        let base_path = base_path.trim().to_string();
        let id = match role {
            Role::Public => name.to_lowercase(),
            Role::Private => format!("{}.{}", base_path, name).to_lowercase(),
        };
        Self {
            name,
            id,
            base_path,
            role,
        }
    }
}

/// Stable handle to a basic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicEventId(pub(crate) u32);

/// Stable handle to a house event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HouseEventId(pub(crate) u32);

/// Stable handle to a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GateId(pub(crate) u32);

impl BasicEventId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl HouseEventId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl GateId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// An atomic stochastic failure with a probability expression
#[derive(Debug, Clone)]
pub struct BasicEvent {
    pub identity: Identity,
    /// Probability of failure; unset until a definition or a CCF group
    /// supplies one
    pub expression: Option<ExprId>,
    /// Replacement gate installed by CCF application; traversals substitute
    /// this gate's subtree for the event
    pub ccf_gate: Option<GateId>,
    /// Display names of the group members a synthetic CCF event stands for
    pub ccf_members: Option<Vec<String>>,
}

impl BasicEvent {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            expression: None,
            ccf_gate: None,
            ccf_members: None,
        }
    }

    /// True for events synthesized by CCF expansion.
    pub fn is_ccf_event(&self) -> bool {
        self.ccf_members.is_some()
    }
}

/// A boolean constant acting as a toggle in the fault tree
#[derive(Debug, Clone)]
pub struct HouseEvent {
    pub identity: Identity,
    pub state: bool,
}

impl HouseEvent {
    pub fn new(identity: Identity, state: bool) -> Self {
        Self { identity, state }
    }
}

/// Boolean connective applied by a gate to its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    /// At least `k` of the arguments
    AtLeast(u32),
    Not,
    Xor,
    /// Pass-through of a single argument
    Null,
}

/// Argument of a formula: any event kind or another gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventRef {
    Basic(BasicEventId),
    House(HouseEventId),
    Gate(GateId),
}

/// Operator plus arguments, the body of a gate
#[derive(Debug, Clone)]
pub struct Formula {
    pub operator: Operator,
    pub args: Vec<EventRef>,
}

impl Formula {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            args: Vec::new(),
        }
    }

    pub fn add_argument(&mut self, arg: EventRef) {
        self.args.push(arg);
    }
}

/// A named logical node of the fault tree
#[derive(Debug, Clone)]
pub struct Gate {
    pub identity: Identity,
    pub formula: Formula,
}

impl Gate {
    pub fn new(identity: Identity, formula: Formula) -> Self {
        Self { identity, formula }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_identity_ignores_base_path_in_id() {
        let identity = Identity::new("PumpOne", "root.cooling", Role::Public);
        assert_eq!(identity.name, "PumpOne");
        assert_eq!(identity.id, "pumpone");
        assert_eq!(identity.base_path, "root.cooling");
    }

    #[test]
    fn private_identity_qualifies_with_path() {
        let identity = Identity::new("PumpOne", "Root.Cooling", Role::Private);
        assert_eq!(identity.id, "root.cooling.pumpone");
    }

    #[test]
    fn identity_trims_whitespace() {
        let identity = Identity::new("  PumpOne ", " root ", Role::Private);
        assert_eq!(identity.id, "root.pumpone");
    }
}
