//! The analysis model container
//!
//! One [`Model`] owns everything a run needs: the expression arena, the
//! event and gate arenas, parameters, fault tree containers, and the CCF
//! groups. Name dictionaries map lowercase ids to arena handles; basic
//! events, house events, and gates share one id space so that a reference
//! in a formula is unambiguous.
//!
//! Reference resolution is one walker for every entity kind. A reference is
//! looked up against increasingly shallow prefixes of the caller's base
//! path and finally bare, which covers local names, qualified local paths,
//! absolute paths, and public entities in a single loop.
//!
//! Once validated and CCF-applied the model is frozen; later mutation
//! attempts are rejected rather than silently accepted.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::ccf::{CcfContext, CcfGroup, CcfGroupId};
use crate::component::Component;
use crate::error::{ModelError, Result};
use crate::event::{
    BasicEvent, BasicEventId, EventRef, Gate, GateId, HouseEvent, HouseEventId, Identity, Operator,
};
use crate::expr::{ExprArena, ExprId, ParameterId};

/// A named quantity usable in expressions
#[derive(Debug, Clone)]
pub struct Parameter {
    pub identity: Identity,
}

/// Container and single owner of all entities of one analysis run
#[derive(Debug, Default)]
pub struct Model {
    name: String,
    exprs: ExprArena,

    basic_events: Vec<BasicEvent>,
    house_events: Vec<HouseEvent>,
    gates: Vec<Gate>,
    parameters: Vec<Parameter>,
    ccf_groups: Vec<CcfGroup>,
    fault_trees: IndexMap<String, Component>,

    basic_event_ids: IndexMap<String, BasicEventId>,
    house_event_ids: IndexMap<String, HouseEventId>,
    gate_ids: IndexMap<String, GateId>,
    parameter_ids: IndexMap<String, ParameterId>,
    ccf_group_ids: IndexMap<String, CcfGroupId>,
    /// Combined event-id space; the value names the kind that holds the id
    event_ids: HashMap<String, &'static str>,

    frozen: bool,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn exprs(&self) -> &ExprArena {
        &self.exprs
    }

    pub fn exprs_mut(&mut self) -> &mut ExprArena {
        &mut self.exprs
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(ModelError::IllegalOperation(
                "the model is frozen after CCF application".into(),
            ));
        }
        Ok(())
    }

    // ===== Entity registration =====

    pub fn add_fault_tree(&mut self, tree: Component) -> Result<()> {
        self.ensure_mutable()?;
        if self.fault_trees.contains_key(&tree.id) {
            return Err(ModelError::Redefinition {
                kind: "fault tree",
                id: tree.id,
            });
        }
        self.fault_trees.insert(tree.id.clone(), tree);
        Ok(())
    }

    pub fn fault_trees(&self) -> &IndexMap<String, Component> {
        &self.fault_trees
    }

    pub fn add_parameter(&mut self, identity: Identity) -> Result<ParameterId> {
        self.ensure_mutable()?;
        if self.parameter_ids.contains_key(&identity.id) {
            return Err(ModelError::Redefinition {
                kind: "parameter",
                id: identity.id,
            });
        }
        let id = self.exprs.new_parameter_slot();
        self.parameter_ids.insert(identity.id.clone(), id);
        self.parameters.push(Parameter { identity });
        Ok(id)
    }

    /// Binds the value expression of a registered parameter. Binding twice
    /// is a redefinition.
    pub fn bind_parameter(&mut self, parameter: ParameterId, value: ExprId) -> Result<()> {
        self.ensure_mutable()?;
        if !self.exprs.bind_parameter(parameter, value) {
            return Err(ModelError::Redefinition {
                kind: "parameter",
                id: self.parameters[parameter.index()].identity.id.clone(),
            });
        }
        Ok(())
    }

    /// Exact-id lookup, used by the reader to tell "same entity seen again"
    /// from "new entity that happens to resolve elsewhere".
    pub fn basic_event_by_id(&self, id: &str) -> Option<BasicEventId> {
        self.basic_event_ids.get(id).copied()
    }

    pub fn parameter_by_id(&self, id: &str) -> Option<ParameterId> {
        self.parameter_ids.get(id).copied()
    }

    pub fn house_event_by_id(&self, id: &str) -> Option<HouseEventId> {
        self.house_event_ids.get(id).copied()
    }

    pub fn add_basic_event(&mut self, event: BasicEvent) -> Result<BasicEventId> {
        self.ensure_mutable()?;
        self.check_event_id(&event.identity)?;
        let id = BasicEventId(self.basic_events.len() as u32);
        self.event_ids.insert(event.identity.id.clone(), "basic event");
        self.basic_event_ids.insert(event.identity.id.clone(), id);
        self.basic_events.push(event);
        Ok(id)
    }

    pub fn add_house_event(&mut self, event: HouseEvent) -> Result<HouseEventId> {
        self.ensure_mutable()?;
        self.check_event_id(&event.identity)?;
        let id = HouseEventId(self.house_events.len() as u32);
        self.event_ids.insert(event.identity.id.clone(), "house event");
        self.house_event_ids.insert(event.identity.id.clone(), id);
        self.house_events.push(event);
        Ok(id)
    }

    pub fn add_gate(&mut self, gate: Gate) -> Result<GateId> {
        self.ensure_mutable()?;
        self.check_event_id(&gate.identity)?;
        let id = GateId(self.gates.len() as u32);
        self.event_ids.insert(gate.identity.id.clone(), "gate");
        self.gate_ids.insert(gate.identity.id.clone(), id);
        self.gates.push(gate);
        Ok(id)
    }

    pub fn add_ccf_group(&mut self, group: CcfGroup) -> Result<CcfGroupId> {
        self.ensure_mutable()?;
        if self.ccf_group_ids.contains_key(&group.identity.id) {
            return Err(ModelError::Redefinition {
                kind: "CCF group",
                id: group.identity.id.clone(),
            });
        }
        let id = CcfGroupId(self.ccf_groups.len() as u32);
        self.ccf_group_ids.insert(group.identity.id.clone(), id);
        self.ccf_groups.push(group);
        Ok(id)
    }

    /// Basic events, house events, and gates share one id space; the error
    /// names whichever kind already claimed the id.
    fn check_event_id(&self, identity: &Identity) -> Result<()> {
        if let Some(kind) = self.event_ids.get(&identity.id) {
            return Err(ModelError::Redefinition {
                kind,
                id: identity.id.clone(),
            });
        }
        Ok(())
    }

    // ===== Arena access =====

    pub fn basic_event(&self, id: BasicEventId) -> &BasicEvent {
        &self.basic_events[id.index()]
    }

    pub fn basic_event_mut(&mut self, id: BasicEventId) -> &mut BasicEvent {
        &mut self.basic_events[id.index()]
    }

    pub fn house_event(&self, id: HouseEventId) -> &HouseEvent {
        &self.house_events[id.index()]
    }

    pub fn gate(&self, id: GateId) -> &Gate {
        &self.gates[id.index()]
    }

    pub fn gate_mut(&mut self, id: GateId) -> &mut Gate {
        &mut self.gates[id.index()]
    }

    pub fn gates(&self) -> impl Iterator<Item = (GateId, &Gate)> {
        self.gates
            .iter()
            .enumerate()
            .map(|(i, g)| (GateId(i as u32), g))
    }

    pub fn basic_events(&self) -> impl Iterator<Item = (BasicEventId, &BasicEvent)> {
        self.basic_events
            .iter()
            .enumerate()
            .map(|(i, e)| (BasicEventId(i as u32), e))
    }

    pub fn ccf_groups(&self) -> &[CcfGroup] {
        &self.ccf_groups
    }

    /// Registered gate ids in declaration order (CCF replacement gates are
    /// unregistered and do not appear here).
    pub fn registered_gates(&self) -> impl Iterator<Item = GateId> + '_ {
        self.gate_ids.values().copied()
    }

    /// Names of all synthetic CCF events, in creation order.
    pub fn ccf_event_names(&self) -> Vec<String> {
        self.basic_events
            .iter()
            .filter(|e| e.is_ccf_event())
            .map(|e| e.identity.name.clone())
            .collect()
    }

    // ===== Reference resolution =====

    pub fn get_parameter(&self, reference: &str, base_path: &str) -> Result<ParameterId> {
        Self::lookup(&self.parameter_ids, reference, base_path)
    }

    pub fn get_basic_event(&self, reference: &str, base_path: &str) -> Result<BasicEventId> {
        Self::lookup(&self.basic_event_ids, reference, base_path)
    }

    pub fn get_house_event(&self, reference: &str, base_path: &str) -> Result<HouseEventId> {
        Self::lookup(&self.house_event_ids, reference, base_path)
    }

    pub fn get_gate(&self, reference: &str, base_path: &str) -> Result<GateId> {
        Self::lookup(&self.gate_ids, reference, base_path)
    }

    pub fn get_ccf_group(&self, reference: &str, base_path: &str) -> Result<CcfGroupId> {
        Self::lookup(&self.ccf_group_ids, reference, base_path)
    }

    /// Resolves a reference that may name any event kind.
    pub fn get_event(&self, reference: &str, base_path: &str) -> Result<EventRef> {
        if let Ok(id) = self.get_gate(reference, base_path) {
            return Ok(EventRef::Gate(id));
        }
        if let Ok(id) = self.get_basic_event(reference, base_path) {
            return Ok(EventRef::Basic(id));
        }
        if let Ok(id) = self.get_house_event(reference, base_path) {
            return Ok(EventRef::House(id));
        }
        Err(ModelError::EntityNotFound {
            reference: reference.trim().to_string(),
            scope: base_path.trim().to_string(),
        })
    }

    /// One walker for every kind: the reference is tried against each
    /// prefix of the base path from deepest to shallowest, then bare. Bare
    /// lookup covers public names and absolute paths alike, since private
    /// ids are registered under their full path.
    fn lookup<T: Copy>(
        dictionary: &IndexMap<String, T>,
        reference: &str,
        base_path: &str,
    ) -> Result<T> {
        let needle = reference.trim().to_lowercase();
        let mut scope = base_path.trim().to_lowercase();
        while !scope.is_empty() {
            if let Some(&found) = dictionary.get(&format!("{}.{}", scope, needle)) {
                return Ok(found);
            }
            match scope.rfind('.') {
                Some(dot) => scope.truncate(dot),
                None => scope.clear(),
            }
        }
        dictionary
            .get(&needle)
            .copied()
            .ok_or_else(|| ModelError::EntityNotFound {
                reference: reference.trim().to_string(),
                scope: base_path.trim().to_string(),
            })
    }

    // ===== CCF group operations =====

    pub fn ccf_add_member(&mut self, group: CcfGroupId, event: BasicEventId) -> Result<()> {
        self.ensure_mutable()?;
        let name = self.basic_events[event.index()].identity.name.clone();
        self.ccf_groups[group.index()].add_member(event, &name)
    }

    /// Sets the group's shared distribution and assigns it as each member's
    /// probability expression.
    pub fn ccf_set_distribution(&mut self, group: CcfGroupId, distribution: ExprId) -> Result<()> {
        self.ensure_mutable()?;
        self.ccf_groups[group.index()].set_distribution(distribution)?;
        let members: Vec<BasicEventId> =
            self.ccf_groups[group.index()].member_events().collect();
        for member in members {
            self.basic_events[member.index()].expression = Some(distribution);
        }
        Ok(())
    }

    pub fn ccf_add_factor(&mut self, group: CcfGroupId, level: u32, factor: ExprId) -> Result<()> {
        self.ensure_mutable()?;
        self.ccf_groups[group.index()].add_factor(level, factor)
    }

    // ===== Validation and freezing =====

    /// Validates the whole model: expression acyclicity, event probability
    /// domains, gate arity, and every CCF group.
    pub fn validate(&mut self) -> Result<()> {
        self.exprs.ensure_acyclic()?;

        for event in &self.basic_events {
            if let Some(expr) = event.expression {
                if self.exprs.min(expr)? < 0.0 || self.exprs.max(expr)? > 1.0 {
                    return Err(ModelError::Validation(format!(
                        "probability of basic event '{}' has values outside [0, 1]",
                        event.identity.name
                    )));
                }
            }
        }

        for gate in &self.gates {
            Self::validate_formula(gate)?;
        }

        let exprs = &self.exprs;
        for group in &mut self.ccf_groups {
            group.validate(exprs)?;
        }
        debug!(
            basic_events = self.basic_events.len(),
            gates = self.gates.len(),
            ccf_groups = self.ccf_groups.len(),
            "model validated"
        );
        Ok(())
    }

    fn validate_formula(gate: &Gate) -> Result<()> {
        let arity = gate.formula.args.len();
        let name = &gate.identity.name;
        match gate.formula.operator {
            Operator::And | Operator::Or if arity == 0 => Err(ModelError::Validation(format!(
                "gate '{}' has no arguments",
                name
            ))),
            Operator::Not | Operator::Null if arity != 1 => Err(ModelError::Validation(format!(
                "gate '{}' takes exactly one argument",
                name
            ))),
            Operator::Xor if arity < 2 => Err(ModelError::Validation(format!(
                "xor gate '{}' needs at least two arguments",
                name
            ))),
            Operator::AtLeast(k) if k as usize > arity || k == 0 => {
                Err(ModelError::Validation(format!(
                    "atleast gate '{}' requires 1 <= k <= {} arguments, got k = {}",
                    name, arity, k
                )))
            }
            _ => Ok(()),
        }
    }

    /// Rewrites every CCF group into its replacement sub-graph and freezes
    /// the model. Groups must have been validated.
    pub fn apply_ccf(&mut self) -> Result<()> {
        self.ensure_mutable()?;
        let mut groups = std::mem::take(&mut self.ccf_groups);
        let result: Result<()> = (|| {
            for group in &mut groups {
                let mut ctx = CcfContext {
                    exprs: &mut self.exprs,
                    basic_events: &mut self.basic_events,
                    gates: &mut self.gates,
                    basic_event_ids: &mut self.basic_event_ids,
                    event_ids: &mut self.event_ids,
                };
                group.apply(&mut ctx)?;
            }
            Ok(())
        })();
        self.ccf_groups = groups;
        result?;
        self.frozen = true;
        if !self.ccf_groups.is_empty() {
            info!(groups = self.ccf_groups.len(), "CCF models applied");
        }
        Ok(())
    }
}
