//! Lazy arithmetic expression graph
//!
//! Probabilities in a risk model are rarely plain numbers. They are built
//! from parameters, probability distributions, and arithmetic over both,
//! and they are observed in two ways: deterministically (`mean`, `min`,
//! `max`) for point estimates and validation, and stochastically (`sample`)
//! during Monte Carlo trials.
//!
//! All nodes live in an [`ExprArena`] owned by the model; an [`ExprId`] is
//! a stable index into it. Sub-expressions are freely shared, so the graph
//! is a DAG rather than a tree. Sampling state is kept outside the arena in
//! a [`SampleSpace`] so that several Monte Carlo workers can sample the
//! same immutable graph, each with its own trial counter and cache.

use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};

use crate::error::{ModelError, Result};

/// Stable handle to a node in the expression arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl ExprId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable handle to a parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterId(pub(crate) u32);

impl ParameterId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the expression graph
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Constant(f64),
    /// Reference to a named parameter; the bound value is another node
    Parameter(ParameterId),
    /// Uniform deviate on `[lower, upper)`
    Uniform { lower: ExprId, upper: ExprId },
    /// Normal deviate; support clamped to three sigma around the mean
    Normal { mean: ExprId, sigma: ExprId },
    /// Log-normal deviate parameterized by the underlying normal
    LogNormal { mu: ExprId, sigma: ExprId },
    /// Piecewise-uniform density over ascending bin boundaries
    Histogram { boundaries: Vec<f64>, weights: Vec<f64> },
    /// Failure probability `1 - exp(-lambda * t)`
    Exponential { lambda: ExprId, time: ExprId },
    Add(Vec<ExprId>),
    /// Two args denote `a - b`; more fold from the left
    Sub(Vec<ExprId>),
    Mul(Vec<ExprId>),
    Div(Vec<ExprId>),
    Neg(ExprId),
}

/// Arena owning every expression node of a model
///
/// Parameter slots are allocated separately from nodes: the model registers
/// a parameter first and binds its value expression when the definition is
/// seen, which allows forward references in the input.
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
    param_values: Vec<Option<ExprId>>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()]
    }

    fn push(&mut self, node: Expr) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    // ===== Constructors =====

    pub fn constant(&mut self, value: f64) -> ExprId {
        self.push(Expr::Constant(value))
    }

    pub fn parameter(&mut self, param: ParameterId) -> ExprId {
        self.push(Expr::Parameter(param))
    }

    pub fn uniform(&mut self, lower: ExprId, upper: ExprId) -> ExprId {
        self.push(Expr::Uniform { lower, upper })
    }

    pub fn normal(&mut self, mean: ExprId, sigma: ExprId) -> ExprId {
        self.push(Expr::Normal { mean, sigma })
    }

    pub fn lognormal(&mut self, mu: ExprId, sigma: ExprId) -> ExprId {
        self.push(Expr::LogNormal { mu, sigma })
    }

    /// Histogram over `boundaries.len() - 1` bins.
    pub fn histogram(&mut self, boundaries: Vec<f64>, weights: Vec<f64>) -> Result<ExprId> {
        if boundaries.len() != weights.len() + 1 || weights.is_empty() {
            return Err(ModelError::InvalidExpression(
                "histogram requires one more boundary than weights".into(),
            ));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ModelError::InvalidExpression(
                "histogram boundaries must be strictly increasing".into(),
            ));
        }
        if weights.iter().any(|&w| w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(ModelError::InvalidExpression(
                "histogram weights must be non-negative with a positive sum".into(),
            ));
        }
        Ok(self.push(Expr::Histogram { boundaries, weights }))
    }

    pub fn exponential(&mut self, lambda: ExprId, time: ExprId) -> ExprId {
        self.push(Expr::Exponential { lambda, time })
    }

    pub fn add(&mut self, args: Vec<ExprId>) -> Result<ExprId> {
        Self::require_args("add", &args, 2)?;
        Ok(self.push(Expr::Add(args)))
    }

    pub fn sub(&mut self, args: Vec<ExprId>) -> Result<ExprId> {
        Self::require_args("sub", &args, 2)?;
        Ok(self.push(Expr::Sub(args)))
    }

    pub fn mul(&mut self, args: Vec<ExprId>) -> Result<ExprId> {
        Self::require_args("mul", &args, 2)?;
        Ok(self.push(Expr::Mul(args)))
    }

    pub fn div(&mut self, args: Vec<ExprId>) -> Result<ExprId> {
        Self::require_args("div", &args, 2)?;
        Ok(self.push(Expr::Div(args)))
    }

    pub fn neg(&mut self, arg: ExprId) -> ExprId {
        self.push(Expr::Neg(arg))
    }

    fn require_args(op: &str, args: &[ExprId], at_least: usize) -> Result<()> {
        if args.len() < at_least {
            return Err(ModelError::InvalidExpression(format!(
                "'{}' requires at least {} arguments, got {}",
                op,
                at_least,
                args.len()
            )));
        }
        Ok(())
    }

    // ===== Parameter slots =====

    pub fn new_parameter_slot(&mut self) -> ParameterId {
        let id = ParameterId(self.param_values.len() as u32);
        self.param_values.push(None);
        id
    }

    /// Binds a slot's value; returns false if it was already bound.
    pub fn bind_parameter(&mut self, param: ParameterId, value: ExprId) -> bool {
        let slot = &mut self.param_values[param.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }

    fn parameter_value(&self, param: ParameterId) -> Result<ExprId> {
        self.param_values[param.index()].ok_or_else(|| {
            ModelError::InvalidExpression("parameter referenced before its value is defined".into())
        })
    }

    // ===== Deterministic observations =====

    /// Expected value of the expression.
    pub fn mean(&self, id: ExprId) -> Result<f64> {
        match self.get(id) {
            Expr::Constant(v) => Ok(*v),
            Expr::Parameter(p) => self.mean(self.parameter_value(*p)?),
            Expr::Uniform { lower, upper } => Ok((self.mean(*lower)? + self.mean(*upper)?) / 2.0),
            Expr::Normal { mean, .. } => self.mean(*mean),
            Expr::LogNormal { mu, sigma } => {
                let mu = self.mean(*mu)?;
                let sigma = self.mean(*sigma)?;
                Ok((mu + sigma * sigma / 2.0).exp())
            }
            Expr::Histogram { boundaries, weights } => {
                let total: f64 = weights.iter().sum();
                let weighted: f64 = weights
                    .iter()
                    .zip(boundaries.windows(2))
                    .map(|(w, b)| w * (b[0] + b[1]) / 2.0)
                    .sum();
                Ok(weighted / total)
            }
            Expr::Exponential { lambda, time } => {
                Ok(1.0 - (-self.mean(*lambda)? * self.mean(*time)?).exp())
            }
            Expr::Add(args) => args.iter().try_fold(0.0, |acc, a| Ok(acc + self.mean(*a)?)),
            Expr::Sub(args) => {
                let first = self.mean(args[0])?;
                args[1..]
                    .iter()
                    .try_fold(first, |acc, a| Ok(acc - self.mean(*a)?))
            }
            Expr::Mul(args) => args.iter().try_fold(1.0, |acc, a| Ok(acc * self.mean(*a)?)),
            Expr::Div(args) => {
                let first = self.mean(args[0])?;
                args[1..].iter().try_fold(first, |acc, a| {
                    let d = self.mean(*a)?;
                    if d == 0.0 {
                        return Err(ModelError::InvalidExpression("division by zero".into()));
                    }
                    Ok(acc / d)
                })
            }
            Expr::Neg(arg) => Ok(-self.mean(*arg)?),
        }
    }

    /// Lower end of the expression's support.
    pub fn min(&self, id: ExprId) -> Result<f64> {
        Ok(self.interval(id)?.0)
    }

    /// Upper end of the expression's support.
    pub fn max(&self, id: ExprId) -> Result<f64> {
        Ok(self.interval(id)?.1)
    }

    /// The `[min, max]` image of the expression, by interval arithmetic.
    pub fn interval(&self, id: ExprId) -> Result<(f64, f64)> {
        match self.get(id) {
            Expr::Constant(v) => Ok((*v, *v)),
            Expr::Parameter(p) => self.interval(self.parameter_value(*p)?),
            Expr::Uniform { lower, upper } => {
                Ok((self.interval(*lower)?.0, self.interval(*upper)?.1))
            }
            // Unbounded supports clamp to three sigma around the mean.
            Expr::Normal { mean, sigma } => {
                let (mean_lo, mean_hi) = self.interval(*mean)?;
                let sigma_hi = self.interval(*sigma)?.1;
                Ok((mean_lo - 3.0 * sigma_hi, mean_hi + 3.0 * sigma_hi))
            }
            Expr::LogNormal { mu, sigma } => {
                let (mu_lo, mu_hi) = self.interval(*mu)?;
                let sigma_hi = self.interval(*sigma)?.1;
                Ok(((mu_lo - 3.0 * sigma_hi).exp(), (mu_hi + 3.0 * sigma_hi).exp()))
            }
            Expr::Histogram { boundaries, .. } => {
                Ok((boundaries[0], boundaries[boundaries.len() - 1]))
            }
            Expr::Exponential { lambda, time } => {
                let (l_lo, l_hi) = self.interval(*lambda)?;
                let (t_lo, t_hi) = self.interval(*time)?;
                Ok((1.0 - (-l_lo * t_lo).exp(), 1.0 - (-l_hi * t_hi).exp()))
            }
            Expr::Add(args) => {
                let mut lo = 0.0;
                let mut hi = 0.0;
                for arg in args {
                    let (a_lo, a_hi) = self.interval(*arg)?;
                    lo += a_lo;
                    hi += a_hi;
                }
                Ok((lo, hi))
            }
            Expr::Sub(args) => {
                let mut acc = self.interval(args[0])?;
                for arg in &args[1..] {
                    let (a_lo, a_hi) = self.interval(*arg)?;
                    acc = (acc.0 - a_hi, acc.1 - a_lo);
                }
                Ok(acc)
            }
            Expr::Mul(args) => {
                let mut acc = self.interval(args[0])?;
                for arg in &args[1..] {
                    acc = interval_product(acc, self.interval(*arg)?);
                }
                Ok(acc)
            }
            Expr::Div(args) => {
                let mut acc = self.interval(args[0])?;
                for arg in &args[1..] {
                    let divisor = self.interval(*arg)?;
                    if divisor.0 <= 0.0 && divisor.1 >= 0.0 {
                        return Err(ModelError::InvalidExpression(
                            "denominator interval contains zero".into(),
                        ));
                    }
                    acc = interval_product(acc, (1.0 / divisor.1, 1.0 / divisor.0));
                }
                Ok(acc)
            }
            Expr::Neg(arg) => {
                let (lo, hi) = self.interval(*arg)?;
                Ok((-hi, -lo))
            }
        }
    }

    // ===== Stochastic observation =====

    /// Draws one realization of the expression for the space's current trial.
    ///
    /// The first call for a node within a trial computes and caches; repeated
    /// calls return the cached value, so shared sub-expressions realize once
    /// per trial. Pure in (graph topology, rng stream, trial id).
    pub fn sample<R: Rng>(&self, id: ExprId, space: &mut SampleSpace, rng: &mut R) -> Result<f64> {
        space.reserve(self.nodes.len());
        if let Some(cached) = space.lookup(id) {
            return Ok(cached);
        }
        let value = match self.get(id) {
            Expr::Constant(v) => *v,
            Expr::Parameter(p) => self.sample(self.parameter_value(*p)?, space, rng)?,
            Expr::Uniform { lower, upper } => {
                let lo = self.sample(*lower, space, rng)?;
                let hi = self.sample(*upper, space, rng)?;
                if lo >= hi {
                    return Err(ModelError::InvalidExpression(
                        "uniform deviate requires lower < upper".into(),
                    ));
                }
                rng.gen_range(lo..hi)
            }
            Expr::Normal { mean, sigma } => {
                let mean = self.sample(*mean, space, rng)?;
                let sigma = self.sample(*sigma, space, rng)?;
                Normal::new(mean, sigma)
                    .map_err(|_| {
                        ModelError::InvalidExpression("normal deviate requires sigma > 0".into())
                    })?
                    .sample(rng)
            }
            Expr::LogNormal { mu, sigma } => {
                let mu = self.sample(*mu, space, rng)?;
                let sigma = self.sample(*sigma, space, rng)?;
                LogNormal::new(mu, sigma)
                    .map_err(|_| {
                        ModelError::InvalidExpression("lognormal deviate requires sigma > 0".into())
                    })?
                    .sample(rng)
            }
            Expr::Histogram { boundaries, weights } => {
                // Weighted bin choice, then uniform within the bin.
                let total: f64 = weights.iter().sum();
                let mut remaining = rng.gen::<f64>() * total;
                let mut value = boundaries[boundaries.len() - 1];
                for (i, &w) in weights.iter().enumerate() {
                    if remaining < w || i == weights.len() - 1 {
                        let fraction = if w > 0.0 { remaining / w } else { 0.0 };
                        value = boundaries[i] + fraction.min(1.0) * (boundaries[i + 1] - boundaries[i]);
                        break;
                    }
                    remaining -= w;
                }
                value
            }
            Expr::Exponential { lambda, time } => {
                let lambda = self.sample(*lambda, space, rng)?;
                let time = self.sample(*time, space, rng)?;
                1.0 - (-lambda * time).exp()
            }
            Expr::Add(args) => {
                let mut acc = 0.0;
                for arg in args {
                    acc += self.sample(*arg, space, rng)?;
                }
                acc
            }
            Expr::Sub(args) => {
                let mut acc = self.sample(args[0], space, rng)?;
                for arg in &args[1..] {
                    acc -= self.sample(*arg, space, rng)?;
                }
                acc
            }
            Expr::Mul(args) => {
                let mut acc = 1.0;
                for arg in args {
                    acc *= self.sample(*arg, space, rng)?;
                }
                acc
            }
            Expr::Div(args) => {
                let mut acc = self.sample(args[0], space, rng)?;
                for arg in &args[1..] {
                    let divisor = self.sample(*arg, space, rng)?;
                    if divisor == 0.0 {
                        return Err(ModelError::InvalidExpression("division by zero".into()));
                    }
                    acc /= divisor;
                }
                acc
            }
            Expr::Neg(arg) => -self.sample(*arg, space, rng)?,
        };
        space.store(id, value);
        Ok(value)
    }

    /// Rejects parameter definitions that reach themselves.
    pub fn ensure_acyclic(&self) -> Result<()> {
        let mut state = vec![Visit::None; self.nodes.len()];
        for i in 0..self.nodes.len() {
            self.visit(ExprId(i as u32), &mut state)?;
        }
        Ok(())
    }

    fn visit(&self, id: ExprId, state: &mut [Visit]) -> Result<()> {
        match state[id.index()] {
            Visit::Done => return Ok(()),
            Visit::Active => {
                return Err(ModelError::InvalidExpression(
                    "cycle through parameter definitions".into(),
                ))
            }
            Visit::None => state[id.index()] = Visit::Active,
        }
        for child in self.children(id)? {
            self.visit(child, state)?;
        }
        state[id.index()] = Visit::Done;
        Ok(())
    }

    fn children(&self, id: ExprId) -> Result<Vec<ExprId>> {
        Ok(match self.get(id) {
            Expr::Constant(_) | Expr::Histogram { .. } => Vec::new(),
            // Unbound slots are legal here; they fail at observation time.
            Expr::Parameter(p) => match self.param_values[p.index()] {
                Some(value) => vec![value],
                None => Vec::new(),
            },
            Expr::Uniform { lower, upper } => vec![*lower, *upper],
            Expr::Normal { mean, sigma } => vec![*mean, *sigma],
            Expr::LogNormal { mu, sigma } => vec![*mu, *sigma],
            Expr::Exponential { lambda, time } => vec![*lambda, *time],
            Expr::Add(args) | Expr::Sub(args) | Expr::Mul(args) | Expr::Div(args) => args.clone(),
            Expr::Neg(arg) => vec![*arg],
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    None,
    Active,
    Done,
}

/// Interval image of a product, from the four endpoint candidates.
fn interval_product(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    let candidates = [a.0 * b.0, a.0 * b.1, a.1 * b.0, a.1 * b.1];
    let lo = candidates.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = candidates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lo, hi)
}

/// Per-worker sampling state: a monotonic trial id and one memo slot per node
///
/// Slots are tagged with the trial that wrote them, so advancing the trial
/// invalidates the whole cache lazily with no sweep over the arena.
#[derive(Debug, Clone, Default)]
pub struct SampleSpace {
    trial: u64,
    slots: Vec<(u64, f64)>,
}

impl SampleSpace {
    pub fn new() -> Self {
        Self {
            trial: 1,
            slots: Vec::new(),
        }
    }

    /// Starts the next Monte Carlo trial.
    pub fn begin_trial(&mut self) {
        self.trial += 1;
    }

    pub fn trial(&self) -> u64 {
        self.trial
    }

    fn reserve(&mut self, len: usize) {
        if self.slots.len() < len {
            self.slots.resize(len, (0, 0.0));
        }
    }

    fn lookup(&self, id: ExprId) -> Option<f64> {
        let (tag, value) = self.slots[id.index()];
        (tag == self.trial).then_some(value)
    }

    fn store(&mut self, id: ExprId, value: f64) {
        self.slots[id.index()] = (self.trial, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn constant_observations() {
        let mut arena = ExprArena::new();
        let c = arena.constant(0.25);
        assert_eq!(arena.mean(c).unwrap(), 0.25);
        assert_eq!(arena.interval(c).unwrap(), (0.25, 0.25));
    }

    #[test]
    fn sub_folds_from_the_left() {
        let mut arena = ExprArena::new();
        let ten = arena.constant(10.0);
        let three = arena.constant(3.0);
        let two = arena.constant(2.0);
        let diff = arena.sub(vec![ten, three, two]).unwrap();
        assert_eq!(arena.mean(diff).unwrap(), 5.0);
    }

    #[test]
    fn div_interval_through_zero_is_rejected() {
        let mut arena = ExprArena::new();
        let one = arena.constant(1.0);
        let lo = arena.constant(-0.5);
        let hi = arena.constant(0.5);
        let denom = arena.uniform(lo, hi);
        let quotient = arena.div(vec![one, denom]).unwrap();
        let err = arena.interval(quotient).unwrap_err();
        assert!(matches!(err, ModelError::InvalidExpression(_)));
    }

    #[test]
    fn normal_support_clamps_to_three_sigma() {
        let mut arena = ExprArena::new();
        let mean = arena.constant(5.0);
        let sigma = arena.constant(1.0);
        let normal = arena.normal(mean, sigma);
        assert_eq!(arena.interval(normal).unwrap(), (2.0, 8.0));
        assert_eq!(arena.mean(normal).unwrap(), 5.0);
    }

    #[test]
    fn histogram_mean_and_support() {
        let mut arena = ExprArena::new();
        let h = arena
            .histogram(vec![0.0, 1.0, 3.0], vec![1.0, 1.0])
            .unwrap();
        // Bins [0,1) and [1,3) with equal weight: mean of midpoints 0.5 and 2.
        assert!((arena.mean(h).unwrap() - 1.25).abs() < 1e-12);
        assert_eq!(arena.interval(h).unwrap(), (0.0, 3.0));
    }

    #[test]
    fn histogram_rejects_bad_bins() {
        let mut arena = ExprArena::new();
        assert!(arena.histogram(vec![0.0, 0.0], vec![1.0]).is_err());
        assert!(arena.histogram(vec![0.0, 1.0], vec![-1.0]).is_err());
        assert!(arena.histogram(vec![0.0], vec![]).is_err());
    }

    #[test]
    fn sample_memoizes_within_a_trial() {
        let mut arena = ExprArena::new();
        let lo = arena.constant(0.0);
        let hi = arena.constant(1.0);
        let u = arena.uniform(lo, hi);
        let mut space = SampleSpace::new();
        let mut rng = StdRng::seed_from_u64(7);

        let first = arena.sample(u, &mut space, &mut rng).unwrap();
        let second = arena.sample(u, &mut space, &mut rng).unwrap();
        assert_eq!(first, second);

        space.begin_trial();
        let third = arena.sample(u, &mut space, &mut rng).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn shared_subexpression_realizes_once_per_trial() {
        let mut arena = ExprArena::new();
        let lo = arena.constant(0.0);
        let hi = arena.constant(1.0);
        let shared = arena.uniform(lo, hi);
        let doubled = arena.add(vec![shared, shared]).unwrap();
        let mut space = SampleSpace::new();
        let mut rng = StdRng::seed_from_u64(11);

        let sum = arena.sample(doubled, &mut space, &mut rng).unwrap();
        let part = arena.sample(shared, &mut space, &mut rng).unwrap();
        assert_eq!(sum, 2.0 * part);
    }

    #[test]
    fn unbound_parameter_fails_observation() {
        let mut arena = ExprArena::new();
        let slot = arena.new_parameter_slot();
        let reference = arena.parameter(slot);
        assert!(arena.mean(reference).is_err());

        let value = arena.constant(0.5);
        arena.bind_parameter(slot, value);
        assert_eq!(arena.mean(reference).unwrap(), 0.5);
    }

    #[test]
    fn parameter_cycle_is_detected() {
        let mut arena = ExprArena::new();
        let slot = arena.new_parameter_slot();
        let reference = arena.parameter(slot);
        let one = arena.constant(1.0);
        let sum = arena.add(vec![reference, one]).unwrap();
        arena.bind_parameter(slot, sum);
        assert!(arena.ensure_acyclic().is_err());
    }

    #[test]
    fn exponential_mean_matches_closed_form() {
        let mut arena = ExprArena::new();
        let lambda = arena.constant(0.001);
        let time = arena.constant(100.0);
        let p = arena.exponential(lambda, time);
        let expected = 1.0 - (-0.1f64).exp();
        assert!((arena.mean(p).unwrap() - expected).abs() < 1e-12);
    }
}
