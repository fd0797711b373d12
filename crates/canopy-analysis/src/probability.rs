//! Top-event probability from a reduced fault tree

use serde::Serialize;
use tracing::debug;

use canopy_model::{BasicEventId, Model};

use crate::fault_tree::FaultTreeAnalysis;
use crate::AnalysisError;

/// How the top-event probability is computed from the reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Approximation {
    /// Shannon decomposition over the decision diagram; no approximation
    Exact,
    /// Sum of cut set products, clamped to 1; conservative for small
    /// probabilities, saturates quickly for large ones
    RareEvent,
    /// Min-cut upper bound: 1 minus the product of cut set complements
    Mcub,
}

impl Approximation {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "rare-event" => Some(Self::RareEvent),
            "mcub" => Some(Self::Mcub),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::RareEvent => "rare-event",
            Self::Mcub => "mcub",
        }
    }
}

/// Probability analysis results for one top event
#[derive(Debug, Clone, Serialize)]
pub struct ProbabilityResult {
    pub approximation: Approximation,
    /// Probability of the top event
    pub p_total: f64,
    /// Product of event probabilities per minimal cut set, in cut set order
    pub cut_set_probabilities: Vec<f64>,
}

/// Mean probability of every variable event, in diagram order.
pub fn event_probabilities(
    model: &Model,
    variables: &[BasicEventId],
) -> Result<Vec<f64>, AnalysisError> {
    variables
        .iter()
        .map(|&id| {
            let event = model.basic_event(id);
            let expr = event.expression.ok_or_else(|| {
                AnalysisError::MissingProbability(event.identity.name.clone())
            })?;
            Ok(model.exprs().mean(expr)?)
        })
        .collect()
}

/// Computes the top-event probability under the chosen approximation.
pub fn analyze(
    model: &Model,
    analysis: &FaultTreeAnalysis,
    approximation: Approximation,
) -> Result<ProbabilityResult, AnalysisError> {
    let p = event_probabilities(model, analysis.variables())?;
    let index_of = |event: BasicEventId| {
        analysis
            .variables()
            .iter()
            .position(|&v| v == event)
            .expect("cut set event is a variable")
    };

    let cut_set_probabilities: Vec<f64> = analysis
        .cut_sets()
        .iter()
        .map(|cs| cs.events.iter().map(|&e| p[index_of(e)]).product())
        .collect();

    let p_total = match approximation {
        Approximation::Exact => analysis.probability(&p),
        Approximation::RareEvent => cut_set_probabilities.iter().sum::<f64>().min(1.0),
        Approximation::Mcub => {
            1.0 - cut_set_probabilities
                .iter()
                .map(|q| 1.0 - q)
                .product::<f64>()
        }
    };
    debug!(
        top = analysis.top_name(),
        approximation = approximation.label(),
        p_total,
        "probability analysis done"
    );

    Ok(ProbabilityResult {
        approximation,
        p_total,
        cut_set_probabilities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_model::{BasicEvent, EventRef, Formula, Gate, Identity, Operator, Role};

    fn two_event_or(p_a: f64, p_b: f64) -> (Model, FaultTreeAnalysis) {
        let mut model = Model::new("test");
        let mut formula = Formula::new(Operator::Or);
        for (name, p) in [("A", p_a), ("B", p_b)] {
            let expr = model.exprs_mut().constant(p);
            let mut event = BasicEvent::new(Identity::new(name, "", Role::Public));
            event.expression = Some(expr);
            let id = model.add_basic_event(event).unwrap();
            formula.add_argument(EventRef::Basic(id));
        }
        let top = model
            .add_gate(Gate::new(Identity::new("top", "", Role::Public), formula))
            .unwrap();
        let analysis = FaultTreeAnalysis::new(&model, top).unwrap();
        (model, analysis)
    }

    #[test]
    fn exact_differs_from_rare_event() {
        let (model, analysis) = two_event_or(0.5, 0.5);
        let exact = analyze(&model, &analysis, Approximation::Exact).unwrap();
        let rare = analyze(&model, &analysis, Approximation::RareEvent).unwrap();
        assert!((exact.p_total - 0.75).abs() < 1e-12);
        assert!((rare.p_total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mcub_matches_exact_for_disjoint_cut_sets() {
        let (model, analysis) = two_event_or(0.2, 0.3);
        let exact = analyze(&model, &analysis, Approximation::Exact).unwrap();
        let mcub = analyze(&model, &analysis, Approximation::Mcub).unwrap();
        assert!((exact.p_total - mcub.p_total).abs() < 1e-12);
    }

    #[test]
    fn missing_probability_is_reported_by_name() {
        let mut model = Model::new("test");
        let event = BasicEvent::new(Identity::new("Orphan", "", Role::Public));
        let id = model.add_basic_event(event).unwrap();
        let mut formula = Formula::new(Operator::Null);
        formula.add_argument(EventRef::Basic(id));
        let top = model
            .add_gate(Gate::new(Identity::new("top", "", Role::Public), formula))
            .unwrap();
        let analysis = FaultTreeAnalysis::new(&model, top).unwrap();
        let err = analyze(&model, &analysis, Approximation::Exact).unwrap_err();
        assert!(err.to_string().contains("Orphan"));
    }
}
