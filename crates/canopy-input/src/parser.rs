//! Open-PSA MEF model reader
//!
//! Reading happens in two passes over the document tree. The declaration
//! pass registers every named entity (so forward references are legal) and
//! builds the component hierarchy; the definition pass then constructs
//! expressions and formulas against the fully populated name tables.
//!
//! Basic events referenced by formulas or CCF member lists need not be
//! declared anywhere: the fault tree description may leave probabilities to
//! a separate data file, so a reference to an unknown basic event creates
//! it on the spot. Gates and house events must be declared before use.

use std::fs;
use std::path::Path;

use tracing::info;

use canopy_model::{
    BasicEvent, BasicEventId, CcfGroup, CcfGroupId, CcfModel, Component, EventRef, Formula, Gate,
    GateId, HouseEvent, Identity, Model, ModelError, Operator, ParameterId, Role,
};

use crate::error::InputError;
use crate::xml::{parse_document, Element};

type Result<T> = std::result::Result<T, InputError>;

/// Reads the fault tree description and the optional probability file into
/// one validated-ready model.
pub fn read_files(input: &Path, probabilities: Option<&Path>) -> Result<Model> {
    let text = read_file(input)?;
    info!(file = %input.display(), "reading fault tree description");
    let mut model = parse_model(&text)?;
    if let Some(path) = probabilities {
        let text = read_file(path)?;
        info!(file = %path.display(), "reading probability data");
        merge(&mut model, &text)?;
    }
    Ok(model)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| InputError::Io(format!("{}: {}", path.display(), e)))
}

/// Parses one document into a fresh model.
pub fn parse_model(xml: &str) -> Result<Model> {
    let document = parse_document(xml)?;
    let mut model = Model::new(document.attribute("name").unwrap_or(""));
    populate(&document, &mut model)?;
    Ok(model)
}

/// Parses one document into an existing model; used for the probability
/// file, which completes entities the description file only referenced.
pub fn merge(model: &mut Model, xml: &str) -> Result<()> {
    let document = parse_document(xml)?;
    populate(&document, model)
}

fn populate(document: &Element, model: &mut Model) -> Result<()> {
    let mut defs = Definitions::default();
    for child in &document.children {
        match child.name.as_str() {
            "define-fault-tree" => {
                let name = child.required_attribute("name")?;
                let tree = declare_container(child, name, "", model, &mut defs)?;
                model.add_fault_tree(tree)?;
            }
            "model-data" => {
                for leaf in &child.children {
                    declare_leaf(leaf, "", None, model, &mut defs)?;
                }
            }
            "label" | "attributes" => {}
            _ => declare_leaf(child, "", None, model, &mut defs)?,
        }
    }
    define_all(model, &defs)
}

/// Definitions deferred to the second pass, with their scopes
#[derive(Default)]
struct Definitions<'a> {
    parameters: Vec<(ParameterId, &'a Element, String)>,
    basic_events: Vec<(BasicEventId, &'a Element, String)>,
    gates: Vec<(GateId, &'a Element, String)>,
    ccf_groups: Vec<(CcfGroupId, &'a Element, String)>,
}

fn declare_container<'a>(
    node: &'a Element,
    name: &str,
    parent_path: &str,
    model: &mut Model,
    defs: &mut Definitions<'a>,
) -> Result<Component> {
    let mut component = Component::new(name);
    let path = if parent_path.is_empty() {
        component.id.clone()
    } else {
        format!("{}.{}", parent_path, component.id)
    };
    for child in &node.children {
        match child.name.as_str() {
            "define-component" => {
                let child_name = child.required_attribute("name")?;
                let nested = declare_container(child, child_name, &path, model, defs)?;
                component.add_component(nested)?;
            }
            "label" | "attributes" => {}
            _ => declare_leaf(child, &path, Some(&mut component), model, defs)?,
        }
    }
    Ok(component)
}

fn declare_leaf<'a>(
    node: &'a Element,
    base_path: &str,
    mut component: Option<&mut Component>,
    model: &mut Model,
    defs: &mut Definitions<'a>,
) -> Result<()> {
    match node.name.as_str() {
        "define-parameter" => {
            let identity = identity_of(node, base_path)?;
            let lookup_id = identity.id.clone();
            let id = match model.parameter_by_id(&lookup_id) {
                Some(existing) => existing,
                None => model.add_parameter(identity)?,
            };
            if let Some(scope) = component.as_deref_mut() {
                scope.parameters.push(lookup_id);
            }
            defs.parameters.push((id, node, base_path.to_string()));
        }
        "define-basic-event" => {
            let identity = identity_of(node, base_path)?;
            let lookup_id = identity.id.clone();
            let id = match model.basic_event_by_id(&lookup_id) {
                Some(existing) => existing,
                None => model.add_basic_event(BasicEvent::new(identity))?,
            };
            if let Some(scope) = component.as_deref_mut() {
                scope.basic_events.push(lookup_id);
            }
            defs.basic_events.push((id, node, base_path.to_string()));
        }
        "define-house-event" => {
            let identity = identity_of(node, base_path)?;
            let state = match node.children_named("constant").next() {
                Some(constant) => parse_bool(constant.required_attribute("value")?)?,
                None => false,
            };
            if let Some(scope) = component.as_deref_mut() {
                scope.house_events.push(identity.id.clone());
            }
            model.add_house_event(HouseEvent::new(identity, state))?;
        }
        "define-gate" => {
            let identity = identity_of(node, base_path)?;
            let lookup_id = identity.id.clone();
            // Placeholder formula; the definition pass always replaces it.
            let id = model.add_gate(Gate::new(identity, Formula::new(Operator::Null)))?;
            if let Some(scope) = component.as_deref_mut() {
                scope.gates.push(lookup_id);
            }
            defs.gates.push((id, node, base_path.to_string()));
        }
        "define-ccf-group" => {
            let identity = identity_of(node, base_path)?;
            let label = node.required_attribute("model")?;
            let ccf_model = CcfModel::parse(label).ok_or_else(|| {
                InputError::Malformed(format!("unknown CCF model '{}'", label))
            })?;
            let lookup_id = identity.id.clone();
            let id = model.add_ccf_group(CcfGroup::new(identity, ccf_model))?;
            if let Some(scope) = component.as_deref_mut() {
                scope.ccf_groups.push(lookup_id);
            }
            defs.ccf_groups.push((id, node, base_path.to_string()));
        }
        other => {
            return Err(InputError::Malformed(format!(
                "unexpected element '{}'",
                other
            )))
        }
    }
    Ok(())
}

fn define_all(model: &mut Model, defs: &Definitions<'_>) -> Result<()> {
    // Parameters first: every other expression may reference them.
    for (id, node, path) in &defs.parameters {
        if let Some(value_node) = expression_child(node) {
            let value = build_expression(value_node, path, model)?;
            model.bind_parameter(*id, value)?;
        }
    }
    for (id, node, path) in &defs.basic_events {
        if let Some(value_node) = expression_child(node) {
            if model.basic_event(*id).expression.is_some() {
                return Err(InputError::Model(ModelError::Redefinition {
                    kind: "basic event",
                    id: model.basic_event(*id).identity.id.clone(),
                }));
            }
            let value = build_expression(value_node, path, model)?;
            model.basic_event_mut(*id).expression = Some(value);
        }
    }
    for (id, node, path) in &defs.gates {
        let formula_node = node
            .children
            .iter()
            .find(|child| !matches!(child.name.as_str(), "label" | "attributes"))
            .ok_or_else(|| {
                InputError::Malformed(format!(
                    "gate '{}' has no formula",
                    model.gate(*id).identity.name
                ))
            })?;
        let formula = build_formula(formula_node, path, model)?;
        model.gate_mut(*id).formula = formula;
    }
    for (id, node, path) in &defs.ccf_groups {
        define_ccf_group(*id, node, path, model)?;
    }
    Ok(())
}

fn define_ccf_group(
    group: CcfGroupId,
    node: &Element,
    base_path: &str,
    model: &mut Model,
) -> Result<()> {
    for child in &node.children {
        match child.name.as_str() {
            "members" => {
                for member in &child.children {
                    if member.name != "basic-event" {
                        return Err(InputError::Malformed(format!(
                            "CCF group members must be basic events, found '{}'",
                            member.name
                        )));
                    }
                    let name = member.required_attribute("name")?;
                    let event = resolve_or_create_basic_event(name, base_path, model)?;
                    model.ccf_add_member(group, event)?;
                }
            }
            "distribution" => {
                let value_node = expression_child(child).ok_or_else(|| {
                    InputError::Malformed("CCF distribution has no expression".into())
                })?;
                let value = build_expression(value_node, base_path, model)?;
                model.ccf_set_distribution(group, value)?;
            }
            "factors" => {
                for factor in child.children_named("factor") {
                    add_ccf_factor(group, factor, base_path, model)?;
                }
            }
            "factor" => add_ccf_factor(group, child, base_path, model)?,
            "label" | "attributes" => {}
            other => {
                return Err(InputError::Malformed(format!(
                    "unexpected element '{}' in CCF group",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn add_ccf_factor(
    group: CcfGroupId,
    node: &Element,
    base_path: &str,
    model: &mut Model,
) -> Result<()> {
    let level: u32 = node
        .required_attribute("level")?
        .trim()
        .parse()
        .map_err(|_| {
            InputError::Malformed(format!(
                "invalid CCF factor level '{}'",
                node.attribute("level").unwrap_or_default()
            ))
        })?;
    let value_node = expression_child(node)
        .ok_or_else(|| InputError::Malformed("CCF factor has no expression".into()))?;
    let value = build_expression(value_node, base_path, model)?;
    model.ccf_add_factor(group, level, value)?;
    Ok(())
}

// ===== Expressions =====

const EXPRESSION_ELEMENTS: &[&str] = &[
    "float",
    "int",
    "parameter",
    "uniform-deviate",
    "normal-deviate",
    "lognormal-deviate",
    "histogram",
    "exponential",
    "add",
    "sub",
    "mul",
    "div",
    "neg",
];

fn expression_child(node: &Element) -> Option<&Element> {
    node.children
        .iter()
        .find(|child| EXPRESSION_ELEMENTS.contains(&child.name.as_str()))
}

fn build_expression(
    node: &Element,
    base_path: &str,
    model: &mut Model,
) -> Result<canopy_model::ExprId> {
    match node.name.as_str() {
        "float" | "int" => {
            let value = parse_number(node.required_attribute("value")?)?;
            Ok(model.exprs_mut().constant(value))
        }
        "parameter" => {
            let name = node.required_attribute("name")?;
            let parameter = model.get_parameter(name, base_path)?;
            Ok(model.exprs_mut().parameter(parameter))
        }
        "uniform-deviate" => {
            let (lower, upper) = two_operands(node, base_path, model)?;
            Ok(model.exprs_mut().uniform(lower, upper))
        }
        "normal-deviate" => {
            let (mean, sigma) = two_operands(node, base_path, model)?;
            Ok(model.exprs_mut().normal(mean, sigma))
        }
        "lognormal-deviate" => {
            let (mu, sigma) = two_operands(node, base_path, model)?;
            Ok(model.exprs_mut().lognormal(mu, sigma))
        }
        "exponential" => {
            let (lambda, time) = two_operands(node, base_path, model)?;
            Ok(model.exprs_mut().exponential(lambda, time))
        }
        "histogram" => {
            let mut boundaries = vec![parse_number(node.attribute("lower").unwrap_or("0"))?];
            let mut weights = Vec::new();
            for bin in node.children_named("bin") {
                boundaries.push(parse_number(bin.required_attribute("upper")?)?);
                weights.push(parse_number(bin.required_attribute("weight")?)?);
            }
            Ok(model.exprs_mut().histogram(boundaries, weights)?)
        }
        "add" | "sub" | "mul" | "div" => {
            let args = node
                .children
                .iter()
                .map(|child| build_expression(child, base_path, model))
                .collect::<Result<Vec<_>>>()?;
            let exprs = model.exprs_mut();
            Ok(match node.name.as_str() {
                "add" => exprs.add(args)?,
                "sub" => exprs.sub(args)?,
                "mul" => exprs.mul(args)?,
                _ => exprs.div(args)?,
            })
        }
        "neg" => {
            let operand = node.children.first().ok_or_else(|| {
                InputError::Malformed("'neg' requires one operand".into())
            })?;
            let operand = build_expression(operand, base_path, model)?;
            Ok(model.exprs_mut().neg(operand))
        }
        other => Err(InputError::Malformed(format!(
            "unknown expression element '{}'",
            other
        ))),
    }
}

fn two_operands(
    node: &Element,
    base_path: &str,
    model: &mut Model,
) -> Result<(canopy_model::ExprId, canopy_model::ExprId)> {
    if node.children.len() != 2 {
        return Err(InputError::Malformed(format!(
            "'{}' requires exactly two operands, got {}",
            node.name,
            node.children.len()
        )));
    }
    let first = build_expression(&node.children[0], base_path, model)?;
    let second = build_expression(&node.children[1], base_path, model)?;
    Ok((first, second))
}

// ===== Formulas =====

fn build_formula(node: &Element, base_path: &str, model: &mut Model) -> Result<Formula> {
    let operator = match node.name.as_str() {
        "and" => Operator::And,
        "or" => Operator::Or,
        "xor" => Operator::Xor,
        "not" => Operator::Not,
        "null" => Operator::Null,
        "atleast" => {
            let min: u32 = node
                .required_attribute("min")?
                .trim()
                .parse()
                .map_err(|_| InputError::Malformed("invalid 'atleast' minimum".into()))?;
            Operator::AtLeast(min)
        }
        // A bare event reference defines a pass-through gate.
        "event" | "basic-event" | "house-event" | "gate" => {
            let mut formula = Formula::new(Operator::Null);
            formula.add_argument(resolve_argument(node, base_path, model)?);
            return Ok(formula);
        }
        other => {
            return Err(InputError::Malformed(format!(
                "unknown formula element '{}'",
                other
            )))
        }
    };
    let mut formula = Formula::new(operator);
    for child in &node.children {
        formula.add_argument(resolve_argument(child, base_path, model)?);
    }
    Ok(formula)
}

fn resolve_argument(node: &Element, base_path: &str, model: &mut Model) -> Result<EventRef> {
    let name = node.required_attribute("name")?;
    match node.name.as_str() {
        "event" => match model.get_event(name, base_path) {
            Ok(reference) => Ok(reference),
            Err(_) => Ok(EventRef::Basic(resolve_or_create_basic_event(
                name, base_path, model,
            )?)),
        },
        "basic-event" => Ok(EventRef::Basic(resolve_or_create_basic_event(
            name, base_path, model,
        )?)),
        "house-event" => Ok(EventRef::House(model.get_house_event(name, base_path)?)),
        "gate" => Ok(EventRef::Gate(model.get_gate(name, base_path)?)),
        other => Err(InputError::Malformed(format!(
            "formula arguments must be event references; found '{}' \
             (nested formulas are not supported, name the inner gate)",
            other
        ))),
    }
}

/// Probabilities may live in a separate file, so referencing an unknown
/// basic event declares it.
fn resolve_or_create_basic_event(
    name: &str,
    base_path: &str,
    model: &mut Model,
) -> Result<BasicEventId> {
    match model.get_basic_event(name, base_path) {
        Ok(id) => Ok(id),
        Err(_) => Ok(model.add_basic_event(BasicEvent::new(Identity::new(
            name,
            base_path,
            Role::Public,
        )))?),
    }
}

// ===== Scalars =====

fn identity_of(node: &Element, base_path: &str) -> Result<Identity> {
    let name = node.required_attribute("name")?;
    let role = match node.attribute("role") {
        None => Role::Public,
        Some(role) => match role.trim().to_lowercase().as_str() {
            "public" => Role::Public,
            "private" => Role::Private,
            other => {
                return Err(InputError::Malformed(format!(
                    "unknown role '{}' on '{}'",
                    other, name
                )))
            }
        },
    };
    Ok(Identity::new(name, base_path, role))
}

fn parse_number(text: &str) -> Result<f64> {
    text.trim()
        .parse()
        .map_err(|_| InputError::Malformed(format!("invalid number '{}'", text)))
}

fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(InputError::Malformed(format!(
            "invalid boolean '{}'",
            other
        ))),
    }
}
