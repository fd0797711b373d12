//! Common-cause failure groups
//!
//! A CCF group ties several basic events to one shared failure cause. On
//! application the group rewrites each member into an `or` gate over
//! synthetic CCF events, one per subset of members that can fail together,
//! with probabilities distributed across subset sizes by the group's model
//! (beta-factor, MGL, alpha-factor, or phi-factor).
//!
//! The four models share the combinatorial rewrite and differ only in how
//! factors are admitted, what extra validation they need, and how the
//! per-size probability table is built. Those differences are small enough
//! that each is a match arm on [`CcfModel`] rather than a trait object.
//!
//! Groups move through a strict lifecycle: members and factors accumulate
//! while the group is open, setting the distribution closes membership,
//! validation checks the structure, and application installs the
//! replacement sub-graph. Application is terminal.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::event::{
    BasicEvent, BasicEventId, EventRef, Formula, Gate, GateId, Identity, Operator,
};
use crate::expr::{ExprArena, ExprId};

/// Stable handle to a CCF group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CcfGroupId(pub(crate) u32);

impl CcfGroupId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The probability model of a CCF group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcfModel {
    BetaFactor,
    Mgl,
    AlphaFactor,
    PhiFactor,
}

impl CcfModel {
    /// Parses the `model` attribute of a CCF group declaration.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "beta-factor" => Some(Self::BetaFactor),
            "mgl" => Some(Self::Mgl),
            "alpha-factor" => Some(Self::AlphaFactor),
            "phi-factor" => Some(Self::PhiFactor),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BetaFactor => "beta-factor",
            Self::Mgl => "MGL",
            Self::AlphaFactor => "alpha-factor",
            Self::PhiFactor => "phi-factor",
        }
    }
}

/// Lifecycle phase of a CCF group, strictly ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Members and factors may be added; distribution unset
    Open,
    /// Membership closed; factors still open
    DistributionSet,
    /// Structural checks passed
    Validated,
    /// Replacement sub-graph installed; terminal
    Applied,
}

#[derive(Debug, Clone)]
struct Member {
    event: BasicEventId,
    /// Case-preserving display name, used for synthetic event naming
    name: String,
}

/// Mutable slices of the model that CCF application rewrites
pub(crate) struct CcfContext<'a> {
    pub exprs: &'a mut ExprArena,
    pub basic_events: &'a mut Vec<BasicEvent>,
    pub gates: &'a mut Vec<Gate>,
    pub basic_event_ids: &'a mut IndexMap<String, BasicEventId>,
    pub event_ids: &'a mut HashMap<String, &'static str>,
}

/// A group of basic events sharing a CCF model and a distribution
#[derive(Debug, Clone)]
pub struct CcfGroup {
    pub identity: Identity,
    pub model: CcfModel,
    /// Keyed by lowercase member name; the map's order fixes the iteration
    /// order of every subset enumeration and therefore the synthetic event
    /// names, which must be reproducible across runs.
    members: BTreeMap<String, Member>,
    distribution: Option<ExprId>,
    /// `(level, factor)` pairs in admission order
    factors: Vec<(u32, ExprId)>,
    phase: Phase,
}

impl CcfGroup {
    pub fn new(identity: Identity, model: CcfModel) -> Self {
        Self {
            identity,
            model,
            members: BTreeMap::new(),
            distribution: None,
            factors: Vec::new(),
            phase: Phase::Open,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_events(&self) -> impl Iterator<Item = BasicEventId> + '_ {
        self.members.values().map(|m| m.event)
    }

    pub fn distribution(&self) -> Option<ExprId> {
        self.distribution
    }

    /// Admits a member while the distribution is unset.
    pub fn add_member(&mut self, event: BasicEventId, name: &str) -> Result<()> {
        if self.distribution.is_some() {
            return Err(ModelError::IllegalOperation(format!(
                "no more members accepted; the distribution for CCF group '{}' is already defined",
                self.identity.name
            )));
        }
        let key = name.trim().to_lowercase();
        if self.members.contains_key(&key) {
            return Err(ModelError::DuplicateArgument(format!(
                "member '{}' in CCF group '{}'",
                name.trim(),
                self.identity.name
            )));
        }
        self.members.insert(
            key,
            Member {
                event,
                name: name.trim().to_string(),
            },
        );
        Ok(())
    }

    /// Sets the shared distribution and closes membership.
    ///
    /// The caller assigns the distribution to each member's expression; see
    /// `Model::ccf_set_distribution`.
    pub fn set_distribution(&mut self, distribution: ExprId) -> Result<()> {
        if self.distribution.is_some() {
            return Err(ModelError::IllegalOperation(format!(
                "distribution for CCF group '{}' is already defined",
                self.identity.name
            )));
        }
        self.distribution = Some(distribution);
        self.phase = Phase::DistributionSet;
        Ok(())
    }

    /// Admits the next factor, enforcing the model's level schedule.
    pub fn add_factor(&mut self, level: u32, factor: ExprId) -> Result<()> {
        let expected = match self.model {
            CcfModel::BetaFactor => {
                if !self.factors.is_empty() {
                    return Err(ModelError::Validation(format!(
                        "beta-factor CCF group '{}' takes exactly one factor",
                        self.identity.name
                    )));
                }
                self.members.len() as u32
            }
            CcfModel::Mgl => self.factors.len() as u32 + 2,
            CcfModel::AlphaFactor | CcfModel::PhiFactor => self.factors.len() as u32 + 1,
        };
        if level != expected {
            return Err(ModelError::Validation(format!(
                "{} CCF group '{}' expected factor level {}, got {}",
                self.model.label(),
                self.identity.name,
                expected,
                level
            )));
        }
        self.factors.push((level, factor));
        Ok(())
    }

    /// Runs all structural checks and advances to the validated phase.
    pub fn validate(&mut self, exprs: &ExprArena) -> Result<()> {
        if self.phase == Phase::Applied {
            return Err(ModelError::IllegalOperation(format!(
                "CCF group '{}' is already applied",
                self.identity.name
            )));
        }
        if self.members.len() < 2 {
            return Err(ModelError::Validation(format!(
                "CCF group '{}' must have at least 2 members",
                self.identity.name
            )));
        }
        let distribution = self.distribution.ok_or_else(|| {
            ModelError::Validation(format!(
                "CCF group '{}' has no distribution",
                self.identity.name
            ))
        })?;
        let top_level = match self.factors.last() {
            Some((level, _)) => *level,
            None => {
                return Err(ModelError::Validation(format!(
                    "CCF group '{}' declares no factors",
                    self.identity.name
                )))
            }
        };
        if top_level as usize > self.members.len() {
            return Err(ModelError::Validation(format!(
                "the factor level of CCF group '{}' cannot exceed its {} members",
                self.identity.name,
                self.members.len()
            )));
        }
        for (_, factor) in &self.factors {
            if exprs.min(*factor)? < 0.0 || exprs.max(*factor)? > 1.0 {
                return Err(ModelError::Validation(format!(
                    "factors of CCF group '{}' have values outside [0, 1]",
                    self.identity.name
                )));
            }
        }
        if exprs.min(distribution)? < 0.0 || exprs.max(distribution)? > 1.0 {
            return Err(ModelError::Validation(format!(
                "the distribution of CCF group '{}' has values outside [0, 1]",
                self.identity.name
            )));
        }
        if self.model == CcfModel::PhiFactor {
            self.validate_phi_sums(exprs)?;
        }
        self.phase = Phase::Validated;
        Ok(())
    }

    /// Phi factors are full fractions; their mean, min, and max must each
    /// sum to one. Tolerance acknowledges floating-point imprecision.
    fn validate_phi_sums(&self, exprs: &ExprArena) -> Result<()> {
        const EPSILON: f64 = 1e-4;
        let mut sum_mean = 0.0;
        let mut sum_min = 0.0;
        let mut sum_max = 0.0;
        for (_, factor) in &self.factors {
            sum_mean += exprs.mean(*factor)?;
            sum_min += exprs.min(*factor)?;
            sum_max += exprs.max(*factor)?;
        }
        if (sum_mean - 1.0).abs() > EPSILON
            || (sum_min - 1.0).abs() > EPSILON
            || (sum_max - 1.0).abs() > EPSILON
        {
            return Err(ModelError::Validation(format!(
                "the factors of phi-factor CCF group '{}' must sum to 1",
                self.identity.name
            )));
        }
        Ok(())
    }

    /// Installs the replacement sub-graph into the event model.
    ///
    /// Every member becomes an `or` gate with the member's own identity (the
    /// gate is deliberately not registered in the name tables; it is reached
    /// only through the member's back-reference). Every subset of members up
    /// to the top factor level becomes one synthetic basic event, attached
    /// to the gates of the members it contains.
    pub(crate) fn apply(&mut self, ctx: &mut CcfContext<'_>) -> Result<()> {
        if self.phase != Phase::Validated {
            return Err(ModelError::IllegalOperation(format!(
                "CCF group '{}' must be validated before it is applied",
                self.identity.name
            )));
        }
        let max_level = self.factors.last().expect("validated group").0 as usize;

        let mut member_gates: BTreeMap<&str, GateId> = BTreeMap::new();
        for (key, member) in &self.members {
            let identity = ctx.basic_events[member.event.index()].identity.clone();
            let gate_id = GateId(ctx.gates.len() as u32);
            ctx.gates.push(Gate::new(identity, Formula::new(Operator::Or)));
            ctx.basic_events[member.event.index()].ccf_gate = Some(gate_id);
            member_gates.insert(key.as_str(), gate_id);
        }

        let probabilities = self.probability_table(max_level, ctx.exprs)?;
        let subsets = self.enumerate_subsets(max_level);
        debug!(
            group = %self.identity.name,
            model = self.model.label(),
            members = self.members.len(),
            ccf_events = subsets.len(),
            "applying CCF model"
        );

        for subset in subsets {
            let probability = probabilities[&(subset.len() as u32)];
            let display: Vec<String> = subset
                .iter()
                .map(|key| self.members[key].name.clone())
                .collect();
            let name = format!("[{}]", display.join(" "));
            let identity = Identity::new(&name, &self.identity.base_path, self.identity.role);
            if ctx.event_ids.contains_key(&identity.id) {
                return Err(ModelError::Redefinition {
                    kind: "event",
                    id: identity.id,
                });
            }

            let mut event = BasicEvent::new(identity);
            event.expression = Some(probability);
            event.ccf_members = Some(display);
            let event_id = BasicEventId(ctx.basic_events.len() as u32);
            ctx.event_ids.insert(event.identity.id.clone(), "basic event");
            ctx.basic_event_ids
                .insert(event.identity.id.clone(), event_id);
            ctx.basic_events.push(event);

            for key in &subset {
                let gate_id = member_gates[key.as_str()];
                ctx.gates[gate_id.index()]
                    .formula
                    .add_argument(EventRef::Basic(event_id));
            }
        }

        self.phase = Phase::Applied;
        Ok(())
    }

    /// Every non-empty subset of members with size up to `max_level`,
    /// enumerated breadth-wise. Beta-factor keeps only the single failures
    /// and the total failure.
    fn enumerate_subsets(&self, max_level: usize) -> Vec<BTreeSet<String>> {
        let mut frontier: BTreeSet<BTreeSet<String>> = BTreeSet::new();
        frontier.insert(BTreeSet::new());
        let mut subsets = Vec::new();
        for _ in 0..max_level {
            let mut next: BTreeSet<BTreeSet<String>> = BTreeSet::new();
            for subset in &frontier {
                for key in self.members.keys() {
                    if !subset.contains(key) {
                        let mut extended = subset.clone();
                        extended.insert(key.clone());
                        next.insert(extended);
                    }
                }
            }
            subsets.extend(next.iter().cloned());
            frontier = next;
        }
        if self.model == CcfModel::BetaFactor {
            subsets.retain(|s| s.len() == 1 || s.len() == max_level);
        }
        subsets
    }

    /// Probability of a common-cause failure of exactly `k` members, for
    /// every `k` up to `max_level`, built as shared expression sub-graphs.
    fn probability_table(
        &self,
        max_level: usize,
        exprs: &mut ExprArena,
    ) -> Result<BTreeMap<u32, ExprId>> {
        let q = self.distribution.expect("validated group");
        let n = self.members.len();
        let mut table = BTreeMap::new();
        match self.model {
            // P[1] = (1 - beta) Q, P[n] = beta Q
            CcfModel::BetaFactor => {
                let beta = self.factors[0].1;
                let one = exprs.constant(1.0);
                let independent = exprs.sub(vec![one, beta])?;
                table.insert(1, exprs.mul(vec![independent, q])?);
                table.insert(max_level as u32, exprs.mul(vec![beta, q])?);
            }
            // P[i+1] = 1/C(n-1, i) * prod_{j<i} rho_j * (1 - rho_i) * Q,
            // the last level keeping the full product.
            CcfModel::Mgl => {
                for i in 0..max_level {
                    let scale = exprs.constant(1.0 / choose(n - 1, i) as f64);
                    let mut args = vec![scale];
                    for (_, rho) in &self.factors[..i] {
                        args.push(*rho);
                    }
                    if i < max_level - 1 {
                        let one = exprs.constant(1.0);
                        args.push(exprs.sub(vec![one, self.factors[i].1])?);
                    }
                    args.push(q);
                    table.insert(i as u32 + 1, exprs.mul(args)?);
                }
            }
            // P[i+1] = 1/C(n-1, i) * alpha_{i+1} / sum(alpha) * Q
            CcfModel::AlphaFactor => {
                let alphas: Vec<ExprId> = self.factors.iter().map(|(_, f)| *f).collect();
                let sum = if alphas.len() == 1 {
                    alphas[0]
                } else {
                    exprs.add(alphas)?
                };
                for i in 0..max_level {
                    let scale = exprs.constant(1.0 / choose(n - 1, i) as f64);
                    let fraction = exprs.div(vec![self.factors[i].1, sum])?;
                    table.insert(i as u32 + 1, exprs.mul(vec![scale, fraction, q])?);
                }
            }
            // P[k] = phi_k * Q
            CcfModel::PhiFactor => {
                for (level, phi) in &self.factors {
                    table.insert(*level, exprs.mul(vec![*phi, q])?);
                }
            }
        }
        Ok(table)
    }
}

/// Binomial coefficient in the symmetric product form, exact for the small
/// group sizes this engine targets.
fn choose(n: usize, k: usize) -> u64 {
    let k = k.min(n - k);
    let mut result = 1u64;
    for i in 0..k {
        result = result * (n - i) as u64 / (i + 1) as u64;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Role;
    use crate::model::Model;

    fn group_with_members(model: CcfModel, names: &[&str]) -> (Model, CcfGroupId) {
        let mut m = Model::new("test");
        let group = m
            .add_ccf_group(CcfGroup::new(
                Identity::new("pumps", "", Role::Public),
                model,
            ))
            .unwrap();
        for name in names {
            let event = m
                .add_basic_event(BasicEvent::new(Identity::new(name, "", Role::Public)))
                .unwrap();
            m.ccf_add_member(group, event).unwrap();
        }
        (m, group)
    }

    fn mean_of(m: &Model, reference: &str) -> f64 {
        let event = m.get_basic_event(reference, "").unwrap();
        let expr = m.basic_event(event).expression.unwrap();
        m.exprs().mean(expr).unwrap()
    }

    #[test]
    fn choose_small_values() {
        assert_eq!(choose(2, 0), 1);
        assert_eq!(choose(2, 1), 2);
        assert_eq!(choose(5, 2), 10);
        assert_eq!(choose(14, 7), 3432);
    }

    #[test]
    fn members_rejected_after_distribution() {
        let (mut m, group) = group_with_members(CcfModel::BetaFactor, &["A", "B"]);
        let q = m.exprs_mut().constant(0.01);
        m.ccf_set_distribution(group, q).unwrap();

        let late = m
            .add_basic_event(BasicEvent::new(Identity::new("C", "", Role::Public)))
            .unwrap();
        let err = m.ccf_add_member(group, late).unwrap_err();
        assert!(matches!(err, ModelError::IllegalOperation(_)));
    }

    #[test]
    fn duplicate_member_is_rejected() {
        let (mut m, group) = group_with_members(CcfModel::Mgl, &["A"]);
        let again = m.get_basic_event("a", "").unwrap();
        let err = m.ccf_add_member(group, again).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateArgument(_)));
    }

    #[test]
    fn beta_takes_exactly_one_factor_at_level_n() {
        let (mut m, group) = group_with_members(CcfModel::BetaFactor, &["A", "B", "C"]);
        let beta = m.exprs_mut().constant(0.1);
        let err = m.ccf_add_factor(group, 2, beta).unwrap_err();
        assert!(err.to_string().contains("expected factor level 3"));

        m.ccf_add_factor(group, 3, beta).unwrap();
        let err = m.ccf_add_factor(group, 3, beta).unwrap_err();
        assert!(err.to_string().contains("exactly one factor"));
    }

    #[test]
    fn mgl_levels_start_at_two() {
        let (mut m, group) = group_with_members(CcfModel::Mgl, &["A", "B", "C"]);
        let rho = m.exprs_mut().constant(0.1);
        let err = m.ccf_add_factor(group, 1, rho).unwrap_err();
        assert!(err.to_string().contains("MGL"));
        assert!(err.to_string().contains("expected factor level 2, got 1"));

        m.ccf_add_factor(group, 2, rho).unwrap();
        m.ccf_add_factor(group, 3, rho).unwrap();
    }

    #[test]
    fn validation_needs_two_members() {
        let (mut m, group) = group_with_members(CcfModel::AlphaFactor, &["A"]);
        let q = m.exprs_mut().constant(0.01);
        let alpha = m.exprs_mut().constant(1.0);
        m.ccf_set_distribution(group, q).unwrap();
        m.ccf_add_factor(group, 1, alpha).unwrap();
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("at least 2 members"));
    }

    #[test]
    fn validation_rejects_factor_outside_unit_interval() {
        let (mut m, group) = group_with_members(CcfModel::Mgl, &["A", "B"]);
        let rho = m.exprs_mut().constant(1.5);
        m.ccf_add_factor(group, 2, rho).unwrap();
        let q = m.exprs_mut().constant(0.01);
        m.ccf_set_distribution(group, q).unwrap();
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));
    }

    #[test]
    fn phi_factors_must_sum_to_one() {
        let (mut m, group) = group_with_members(CcfModel::PhiFactor, &["A", "B", "C"]);
        for (level, value) in [(1, 0.5), (2, 0.3), (3, 0.1)] {
            let phi = m.exprs_mut().constant(value);
            m.ccf_add_factor(group, level, phi).unwrap();
        }
        let q = m.exprs_mut().constant(0.01);
        m.ccf_set_distribution(group, q).unwrap();
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1"));
    }

    #[test]
    fn beta_factor_expansion() {
        // Members {A, B, C}, Q = 0.01, beta = 0.1.
        let (mut m, group) = group_with_members(CcfModel::BetaFactor, &["A", "B", "C"]);
        let q = m.exprs_mut().constant(0.01);
        m.ccf_set_distribution(group, q).unwrap();
        let beta = m.exprs_mut().constant(0.1);
        m.ccf_add_factor(group, 3, beta).unwrap();
        m.validate().unwrap();
        m.apply_ccf().unwrap();

        // Only single failures and the total failure are populated.
        assert!((mean_of(&m, "[A]") - 0.009).abs() < 1e-12);
        assert!((mean_of(&m, "[A B C]") - 0.001).abs() < 1e-12);
        assert!(m.get_basic_event("[A B]", "").is_err());

        // Each replacement gate is or(CCF[member], CCF[A B C]).
        for name in ["a", "b", "c"] {
            let member = m.get_basic_event(name, "").unwrap();
            let gate = m.basic_event(member).ccf_gate.expect("replacement gate");
            assert_eq!(m.gate(gate).formula.args.len(), 2);
        }
    }

    #[test]
    fn mgl_probability_table() {
        // n = 3, L = 3, rho2 = 0.1, rho3 = 0.2, Q = 0.01.
        let (mut m, group) = group_with_members(CcfModel::Mgl, &["A", "B", "C"]);
        for (level, value) in [(2, 0.1), (3, 0.2)] {
            let rho = m.exprs_mut().constant(value);
            m.ccf_add_factor(group, level, rho).unwrap();
        }
        let q = m.exprs_mut().constant(0.01);
        m.ccf_set_distribution(group, q).unwrap();
        m.validate().unwrap();
        m.apply_ccf().unwrap();

        assert!((mean_of(&m, "[A]") - 0.009).abs() < 1e-12);
        assert!((mean_of(&m, "[A B]") - 0.0004).abs() < 1e-12);
        assert!((mean_of(&m, "[A B C]") - 0.0002).abs() < 1e-12);

        // C(3, k) events of each size, and each replacement gate holds
        // sum over k of C(2, k-1) = 4 arguments.
        let ccf_events: Vec<_> = m.ccf_event_names();
        assert_eq!(ccf_events.len(), 3 + 3 + 1);
        let member = m.get_basic_event("b", "").unwrap();
        let gate = m.basic_event(member).ccf_gate.unwrap();
        assert_eq!(m.gate(gate).formula.args.len(), 4);
    }

    #[test]
    fn alpha_probability_table() {
        // n = 3, L = 3, alpha = (0.95, 0.03, 0.02), Q = 0.01.
        let (mut m, group) = group_with_members(CcfModel::AlphaFactor, &["A", "B", "C"]);
        for (level, value) in [(1, 0.95), (2, 0.03), (3, 0.02)] {
            let alpha = m.exprs_mut().constant(value);
            m.ccf_add_factor(group, level, alpha).unwrap();
        }
        let q = m.exprs_mut().constant(0.01);
        m.ccf_set_distribution(group, q).unwrap();
        m.validate().unwrap();
        m.apply_ccf().unwrap();

        assert!((mean_of(&m, "[A]") - 0.0095).abs() < 1e-12);
        assert!((mean_of(&m, "[A B]") - 0.00015).abs() < 1e-12);
        assert!((mean_of(&m, "[A B C]") - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn phi_probability_table() {
        let (mut m, group) = group_with_members(CcfModel::PhiFactor, &["A", "B"]);
        for (level, value) in [(1, 0.8), (2, 0.2)] {
            let phi = m.exprs_mut().constant(value);
            m.ccf_add_factor(group, level, phi).unwrap();
        }
        let q = m.exprs_mut().constant(0.01);
        m.ccf_set_distribution(group, q).unwrap();
        m.validate().unwrap();
        m.apply_ccf().unwrap();

        assert!((mean_of(&m, "[A]") - 0.008).abs() < 1e-12);
        assert!((mean_of(&m, "[A B]") - 0.002).abs() < 1e-12);
    }

    #[test]
    fn ccf_event_names_are_stable_across_builds() {
        let build = || {
            let (mut m, group) = group_with_members(CcfModel::Mgl, &["Beta", "Alpha", "Gamma"]);
            for (level, value) in [(2, 0.1), (3, 0.2)] {
                let rho = m.exprs_mut().constant(value);
                m.ccf_add_factor(group, level, rho).unwrap();
            }
            let q = m.exprs_mut().constant(0.01);
            m.ccf_set_distribution(group, q).unwrap();
            m.validate().unwrap();
            m.apply_ccf().unwrap();
            m.ccf_event_names()
        };
        let first = build();
        let second = build();
        assert_eq!(first, second);
        // Member-map order is lowercase-id order, not insertion order.
        assert!(first.contains(&"[Alpha Beta]".to_string()));
    }
}
