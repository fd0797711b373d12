//! Fault tree analysis: Boolean reduction and minimal cut sets
//!
//! The gate graph is compiled into a reduced ordered binary decision
//! diagram. BDDs give a canonical representation of the failure logic, so
//! minimal cut sets fall out as the positive literals of paths to the TRUE
//! terminal, and the exact top-event probability is a single Shannon
//! decomposition over the diagram.
//!
//! Traversal honors CCF rewriting: a basic event carrying a replacement
//! gate contributes that gate's subtree, never itself, so synthetic CCF
//! events appear in cut sets as ordinary Boolean variables.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::debug;

use canopy_model::{BasicEventId, EventRef, GateId, Model, ModelError, Operator};

use crate::AnalysisError;

/// A minimal combination of basic events whose joint occurrence entails the
/// top event
#[derive(Debug, Clone, Serialize)]
pub struct CutSet {
    /// Variable events in the cut set
    #[serde(skip)]
    pub events: Vec<BasicEventId>,
    /// Display names, for reports
    pub names: Vec<String>,
    /// Number of events
    pub order: usize,
}

/// Result of reducing one fault tree
#[derive(Debug)]
pub struct FaultTreeAnalysis {
    top_name: String,
    variables: Vec<BasicEventId>,
    bdd: Bdd,
    root: BddNodeId,
    cut_sets: Vec<CutSet>,
}

impl FaultTreeAnalysis {
    /// Reduces the tree under `top` and extracts its minimal cut sets.
    pub fn new(model: &Model, top: GateId) -> Result<Self, AnalysisError> {
        let top_name = model.gate(top).identity.name.clone();
        let variables = collect_variables(model, top)?;
        let var_index: IndexMap<BasicEventId, usize> = variables
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut bdd = Bdd::new();
        let root = bdd.build(model, EventRef::Gate(top), &var_index);
        let mut cut_sets = bdd.extract_cut_sets(root, &variables);
        minimize_cut_sets(&mut cut_sets);
        for cut_set in &mut cut_sets {
            cut_set.names = cut_set
                .events
                .iter()
                .map(|&id| model.basic_event(id).identity.name.clone())
                .collect();
        }
        debug!(
            top = %top_name,
            variables = variables.len(),
            cut_sets = cut_sets.len(),
            "fault tree reduced"
        );

        Ok(Self {
            top_name,
            variables,
            bdd,
            root,
            cut_sets,
        })
    }

    pub fn top_name(&self) -> &str {
        &self.top_name
    }

    /// Variable events in diagram order; probability vectors index by this.
    pub fn variables(&self) -> &[BasicEventId] {
        &self.variables
    }

    pub fn cut_sets(&self) -> &[CutSet] {
        &self.cut_sets
    }

    /// Exact top-event probability by Shannon decomposition, given one
    /// probability per variable in [`Self::variables`] order.
    pub fn probability(&self, p: &[f64]) -> f64 {
        assert_eq!(p.len(), self.variables.len());
        let mut memo = HashMap::new();
        self.bdd.probability(self.root, p, &mut memo)
    }
}

/// Gates with no registered parent gate, in declaration order: one top
/// event per independent fault tree. Every entry gets its own analysis;
/// a model defining several fault trees yields several.
pub fn top_gates(model: &Model) -> Vec<GateId> {
    let mut referenced: HashSet<GateId> = HashSet::new();
    for (_, gate) in model.gates() {
        for arg in &gate.formula.args {
            if let EventRef::Gate(child) = arg {
                referenced.insert(*child);
            }
        }
    }
    model
        .registered_gates()
        .filter(|id| !referenced.contains(id))
        .collect()
}

/// Collects variable events by the same traversal the BDD build uses, with
/// cycle detection over gates.
fn collect_variables(model: &Model, top: GateId) -> Result<Vec<BasicEventId>, AnalysisError> {
    let mut variables: IndexSet<BasicEventId> = IndexSet::new();
    let mut active: HashSet<GateId> = HashSet::new();
    let mut done: HashSet<GateId> = HashSet::new();
    walk(
        model,
        EventRef::Gate(top),
        &mut variables,
        &mut active,
        &mut done,
    )?;
    Ok(variables.into_iter().collect())
}

fn walk(
    model: &Model,
    reference: EventRef,
    variables: &mut IndexSet<BasicEventId>,
    active: &mut HashSet<GateId>,
    done: &mut HashSet<GateId>,
) -> Result<(), AnalysisError> {
    match reference {
        EventRef::Basic(id) => match model.basic_event(id).ccf_gate {
            Some(gate) => walk(model, EventRef::Gate(gate), variables, active, done),
            None => {
                variables.insert(id);
                Ok(())
            }
        },
        EventRef::House(_) => Ok(()),
        EventRef::Gate(id) => {
            if done.contains(&id) {
                return Ok(());
            }
            if !active.insert(id) {
                return Err(AnalysisError::Model(ModelError::Validation(format!(
                    "fault tree cycle through gate '{}'",
                    model.gate(id).identity.name
                ))));
            }
            for &arg in &model.gate(id).formula.args {
                walk(model, arg, variables, active, done)?;
            }
            active.remove(&id);
            done.insert(id);
            Ok(())
        }
    }
}

fn minimize_cut_sets(cut_sets: &mut Vec<CutSet>) {
    cut_sets.sort_by_key(|cs| cs.order);
    let mut minimal: Vec<CutSet> = Vec::new();
    for candidate in cut_sets.drain(..) {
        let candidate_set: HashSet<_> = candidate.events.iter().copied().collect();
        let subsumed = minimal.iter().any(|kept| {
            kept.events
                .iter()
                .all(|event| candidate_set.contains(event))
        });
        if !subsumed {
            minimal.push(candidate);
        }
    }
    *cut_sets = minimal;
}

// ===== Binary decision diagram =====

/// BDD node handle; 0 and 1 are the terminals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BddNodeId(usize);

impl BddNodeId {
    const FALSE: BddNodeId = BddNodeId(0);
    const TRUE: BddNodeId = BddNodeId(1);
}

#[derive(Debug, Clone, Copy)]
struct BddNode {
    var: usize,
    low: BddNodeId,
    high: BddNodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BoolOp {
    And,
    Or,
    Xor,
}

/// Reduced ordered BDD with hash-consing and a memoized apply
#[derive(Debug)]
struct Bdd {
    nodes: Vec<Option<BddNode>>,
    unique: IndexMap<(usize, BddNodeId, BddNodeId), BddNodeId>,
    computed: IndexMap<(BddNodeId, BddNodeId, BoolOp), BddNodeId>,
}

impl Bdd {
    fn new() -> Self {
        Self {
            // Slots 0 and 1 are the FALSE and TRUE terminals.
            nodes: vec![None, None],
            unique: IndexMap::new(),
            computed: IndexMap::new(),
        }
    }

    fn build(
        &mut self,
        model: &Model,
        reference: EventRef,
        var_index: &IndexMap<BasicEventId, usize>,
    ) -> BddNodeId {
        match reference {
            EventRef::Basic(id) => match model.basic_event(id).ccf_gate {
                Some(gate) => self.build(model, EventRef::Gate(gate), var_index),
                None => {
                    let var = var_index[&id];
                    self.make_node(var, BddNodeId::FALSE, BddNodeId::TRUE)
                }
            },
            EventRef::House(id) => {
                if model.house_event(id).state {
                    BddNodeId::TRUE
                } else {
                    BddNodeId::FALSE
                }
            }
            EventRef::Gate(id) => {
                let args: Vec<BddNodeId> = model
                    .gate(id)
                    .formula
                    .args
                    .iter()
                    .map(|&arg| self.build(model, arg, var_index))
                    .collect();
                match model.gate(id).formula.operator {
                    Operator::And => self.fold(BoolOp::And, &args, BddNodeId::TRUE),
                    Operator::Or => self.fold(BoolOp::Or, &args, BddNodeId::FALSE),
                    Operator::Xor => self.fold(BoolOp::Xor, &args, BddNodeId::FALSE),
                    Operator::Not => self.negate(args[0]),
                    Operator::Null => args[0],
                    Operator::AtLeast(k) => self.at_least(k as usize, &args),
                }
            }
        }
    }

    fn fold(&mut self, op: BoolOp, args: &[BddNodeId], empty: BddNodeId) -> BddNodeId {
        let mut result = match args.first() {
            Some(&first) => first,
            None => return empty,
        };
        for &arg in &args[1..] {
            result = self.apply(result, arg, op);
        }
        result
    }

    /// At least `k` of the arguments, by the Pascal recursion: take the
    /// first argument and require k-1 of the rest, or skip it and require k.
    fn at_least(&mut self, k: usize, args: &[BddNodeId]) -> BddNodeId {
        if k == 0 {
            return BddNodeId::TRUE;
        }
        if k > args.len() {
            return BddNodeId::FALSE;
        }
        if k == args.len() {
            return self.fold(BoolOp::And, args, BddNodeId::TRUE);
        }
        if k == 1 {
            return self.fold(BoolOp::Or, args, BddNodeId::FALSE);
        }
        let first = args[0];
        let rest = &args[1..];
        let with_first = {
            let sub = self.at_least(k - 1, rest);
            self.apply(first, sub, BoolOp::And)
        };
        let without_first = self.at_least(k, rest);
        self.apply(with_first, without_first, BoolOp::Or)
    }

    fn make_node(&mut self, var: usize, low: BddNodeId, high: BddNodeId) -> BddNodeId {
        if low == high {
            return low;
        }
        let key = (var, low, high);
        if let Some(&id) = self.unique.get(&key) {
            return id;
        }
        let id = BddNodeId(self.nodes.len());
        self.nodes.push(Some(BddNode { var, low, high }));
        self.unique.insert(key, id);
        id
    }

    fn negate(&mut self, node: BddNodeId) -> BddNodeId {
        if node == BddNodeId::FALSE {
            return BddNodeId::TRUE;
        }
        if node == BddNodeId::TRUE {
            return BddNodeId::FALSE;
        }
        let BddNode { var, low, high } = self.nodes[node.0].expect("non-terminal");
        let low = self.negate(low);
        let high = self.negate(high);
        self.make_node(var, low, high)
    }

    fn apply(&mut self, f: BddNodeId, g: BddNodeId, op: BoolOp) -> BddNodeId {
        match op {
            BoolOp::Or => {
                if f == BddNodeId::TRUE || g == BddNodeId::TRUE {
                    return BddNodeId::TRUE;
                }
                if f == BddNodeId::FALSE {
                    return g;
                }
                if g == BddNodeId::FALSE {
                    return f;
                }
            }
            BoolOp::And => {
                if f == BddNodeId::FALSE || g == BddNodeId::FALSE {
                    return BddNodeId::FALSE;
                }
                if f == BddNodeId::TRUE {
                    return g;
                }
                if g == BddNodeId::TRUE {
                    return f;
                }
            }
            BoolOp::Xor => {
                if f == BddNodeId::FALSE {
                    return g;
                }
                if g == BddNodeId::FALSE {
                    return f;
                }
                if f == BddNodeId::TRUE {
                    return self.negate(g);
                }
                if g == BddNodeId::TRUE {
                    return self.negate(f);
                }
            }
        }

        let key = (f, g, op);
        if let Some(&result) = self.computed.get(&key) {
            return result;
        }

        let f_node = self.nodes[f.0].expect("non-terminal");
        let g_node = self.nodes[g.0].expect("non-terminal");
        use std::cmp::Ordering;
        let (var, f_low, f_high, g_low, g_high) = match f_node.var.cmp(&g_node.var) {
            Ordering::Less => (f_node.var, f_node.low, f_node.high, g, g),
            Ordering::Greater => (g_node.var, f, f, g_node.low, g_node.high),
            Ordering::Equal => (f_node.var, f_node.low, f_node.high, g_node.low, g_node.high),
        };
        let low = self.apply(f_low, g_low, op);
        let high = self.apply(f_high, g_high, op);
        let result = self.make_node(var, low, high);
        self.computed.insert(key, result);
        result
    }

    /// Paths to TRUE, projected onto their positive literals.
    fn extract_cut_sets(&self, root: BddNodeId, variables: &[BasicEventId]) -> Vec<CutSet> {
        let mut cut_sets = Vec::new();
        let mut path = Vec::new();
        self.extract_paths(root, variables, &mut path, &mut cut_sets);
        cut_sets
    }

    fn extract_paths(
        &self,
        node: BddNodeId,
        variables: &[BasicEventId],
        path: &mut Vec<BasicEventId>,
        cut_sets: &mut Vec<CutSet>,
    ) {
        if node == BddNodeId::TRUE {
            if !path.is_empty() {
                cut_sets.push(CutSet {
                    events: path.clone(),
                    names: Vec::new(),
                    order: path.len(),
                });
            }
            return;
        }
        if node == BddNodeId::FALSE {
            return;
        }
        let BddNode { var, low, high } = self.nodes[node.0].expect("non-terminal");
        path.push(variables[var]);
        self.extract_paths(high, variables, path, cut_sets);
        path.pop();
        self.extract_paths(low, variables, path, cut_sets);
    }

    fn probability(
        &self,
        node: BddNodeId,
        p: &[f64],
        memo: &mut HashMap<BddNodeId, f64>,
    ) -> f64 {
        if node == BddNodeId::FALSE {
            return 0.0;
        }
        if node == BddNodeId::TRUE {
            return 1.0;
        }
        if let Some(&cached) = memo.get(&node) {
            return cached;
        }
        let BddNode { var, low, high } = self.nodes[node.0].expect("non-terminal");
        let value =
            p[var] * self.probability(high, p, memo) + (1.0 - p[var]) * self.probability(low, p, memo);
        memo.insert(node, value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_model::{BasicEvent, Formula, Gate, HouseEvent, Identity, Role};

    struct TreeBuilder {
        model: Model,
    }

    impl TreeBuilder {
        fn new() -> Self {
            Self {
                model: Model::new("test"),
            }
        }

        fn event(&mut self, name: &str, p: f64) -> EventRef {
            let expr = self.model.exprs_mut().constant(p);
            let mut event = BasicEvent::new(Identity::new(name, "", Role::Public));
            event.expression = Some(expr);
            EventRef::Basic(self.model.add_basic_event(event).unwrap())
        }

        fn house(&mut self, name: &str, state: bool) -> EventRef {
            let event = HouseEvent::new(Identity::new(name, "", Role::Public), state);
            EventRef::House(self.model.add_house_event(event).unwrap())
        }

        fn gate(&mut self, name: &str, operator: Operator, args: &[EventRef]) -> GateId {
            let mut formula = Formula::new(operator);
            for &arg in args {
                formula.add_argument(arg);
            }
            self.model
                .add_gate(Gate::new(Identity::new(name, "", Role::Public), formula))
                .unwrap()
        }
    }

    fn cut_set_names(analysis: &FaultTreeAnalysis) -> Vec<Vec<String>> {
        let mut sets: Vec<Vec<String>> = analysis
            .cut_sets()
            .iter()
            .map(|cs| {
                let mut names = cs.names.clone();
                names.sort();
                names
            })
            .collect();
        sets.sort();
        sets
    }

    #[test]
    fn and_of_or_yields_cross_product_cut_sets() {
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.5);
        let b = t.event("B", 0.5);
        let c = t.event("C", 0.5);
        let d = t.event("D", 0.5);
        let left = t.gate("left", Operator::Or, &[a, b]);
        let right = t.gate("right", Operator::Or, &[c, d]);
        let top = t.gate("top", Operator::And, &[EventRef::Gate(left), EventRef::Gate(right)]);

        let analysis = FaultTreeAnalysis::new(&t.model, top).unwrap();
        assert_eq!(
            cut_set_names(&analysis),
            vec![
                vec!["A".to_string(), "C".to_string()],
                vec!["A".to_string(), "D".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["B".to_string(), "D".to_string()],
            ]
        );
    }

    #[test]
    fn at_least_two_of_three() {
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.1);
        let b = t.event("B", 0.1);
        let c = t.event("C", 0.1);
        let top = t.gate("vote", Operator::AtLeast(2), &[a, b, c]);

        let analysis = FaultTreeAnalysis::new(&t.model, top).unwrap();
        assert_eq!(cut_set_names(&analysis).len(), 3);
        assert!(analysis.cut_sets().iter().all(|cs| cs.order == 2));
    }

    #[test]
    fn subsumed_cut_sets_are_eliminated() {
        // or(A, and(A, B)) reduces to the single cut set {A}.
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.5);
        let b = t.event("B", 0.5);
        let inner = t.gate("inner", Operator::And, &[a, b]);
        let top = t.gate("top", Operator::Or, &[a, EventRef::Gate(inner)]);

        let analysis = FaultTreeAnalysis::new(&t.model, top).unwrap();
        assert_eq!(cut_set_names(&analysis), vec![vec!["A".to_string()]]);
    }

    #[test]
    fn house_events_prune_branches() {
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.5);
        let off = t.house("maintenance", false);
        let blocked = t.gate("blocked", Operator::And, &[a, off]);
        let b = t.event("B", 0.5);
        let top = t.gate("top", Operator::Or, &[EventRef::Gate(blocked), b]);

        let analysis = FaultTreeAnalysis::new(&t.model, top).unwrap();
        assert_eq!(cut_set_names(&analysis), vec![vec!["B".to_string()]]);
    }

    #[test]
    fn exact_probability_of_independent_or() {
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.2);
        let b = t.event("B", 0.3);
        let top = t.gate("top", Operator::Or, &[a, b]);

        let analysis = FaultTreeAnalysis::new(&t.model, top).unwrap();
        let p: Vec<f64> = vec![0.2, 0.3];
        assert!((analysis.probability(&p) - 0.44).abs() < 1e-12);
    }

    #[test]
    fn shared_event_probability_is_not_double_counted() {
        // or(and(A, B), and(A, C)) with all p = 0.5: exact is p(A (B or C)).
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.5);
        let b = t.event("B", 0.5);
        let c = t.event("C", 0.5);
        let left = t.gate("left", Operator::And, &[a, b]);
        let right = t.gate("right", Operator::And, &[a, c]);
        let top = t.gate("top", Operator::Or, &[EventRef::Gate(left), EventRef::Gate(right)]);

        let analysis = FaultTreeAnalysis::new(&t.model, top).unwrap();
        let p = vec![0.5; 3];
        assert!((analysis.probability(&p) - 0.375).abs() < 1e-12);
    }

    #[test]
    fn gate_cycle_is_reported() {
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.5);
        let first = t.gate("first", Operator::Or, &[a]);
        let second = t.gate("second", Operator::Or, &[EventRef::Gate(first)]);
        t.model
            .gate_mut(first)
            .formula
            .add_argument(EventRef::Gate(second));

        let err = FaultTreeAnalysis::new(&t.model, second).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn top_gate_detection_skips_referenced_gates() {
        let mut t = TreeBuilder::new();
        let a = t.event("A", 0.5);
        let inner = t.gate("inner", Operator::Or, &[a]);
        let top = t.gate("top", Operator::Null, &[EventRef::Gate(inner)]);
        assert_eq!(top_gates(&t.model), vec![top]);
    }
}
