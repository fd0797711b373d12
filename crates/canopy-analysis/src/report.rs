//! XML report assembly
//!
//! The report is written by plain string building; the structure is small
//! and fixed, and this keeps the output byte-stable across runs. One
//! document holds the model summary and one results section per analyzed
//! top event, each named after its top event.

use canopy_model::Model;

use crate::fault_tree::FaultTreeAnalysis;
use crate::probability::ProbabilityResult;
use crate::uncertainty::UncertaintyResult;

/// Results for one analyzed top event
pub struct TreeResults<'a> {
    pub analysis: &'a FaultTreeAnalysis,
    pub probability: Option<&'a ProbabilityResult>,
    pub uncertainty: Option<&'a UncertaintyResult>,
}

/// Renders the full analysis report, one results section per top event.
pub fn render(model: &Model, results: &[TreeResults<'_>]) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<report>\n");

    xml.push_str(&format!(
        "  <model name=\"{}\">\n",
        escape_xml(model.name())
    ));
    xml.push_str(&format!(
        "    <fault-trees>{}</fault-trees>\n",
        model.fault_trees().len()
    ));
    xml.push_str(&format!(
        "    <basic-events>{}</basic-events>\n",
        model.basic_events().count()
    ));
    xml.push_str(&format!(
        "    <ccf-groups>{}</ccf-groups>\n",
        model.ccf_groups().len()
    ));
    for name in model.ccf_event_names() {
        xml.push_str(&format!(
            "    <ccf-event name=\"{}\"/>\n",
            escape_xml(&name)
        ));
    }
    xml.push_str("  </model>\n");

    for tree in results {
        render_tree(&mut xml, tree);
    }

    xml.push_str("</report>\n");
    xml
}

fn render_tree(xml: &mut String, tree: &TreeResults<'_>) {
    let analysis = tree.analysis;
    xml.push_str(&format!(
        "  <sum-of-products top-event=\"{}\" products=\"{}\"",
        escape_xml(analysis.top_name()),
        analysis.cut_sets().len()
    ));
    if let Some(result) = tree.probability {
        xml.push_str(&format!(
            " probability=\"{}\" approximation=\"{}\"",
            result.p_total,
            result.approximation.label()
        ));
    }
    xml.push_str(">\n");
    for (index, cut_set) in analysis.cut_sets().iter().enumerate() {
        xml.push_str(&format!("    <product order=\"{}\"", cut_set.order));
        if let Some(result) = tree.probability {
            xml.push_str(&format!(
                " probability=\"{}\"",
                result.cut_set_probabilities[index]
            ));
        }
        xml.push_str(">\n");
        for name in &cut_set.names {
            xml.push_str(&format!(
                "      <literal name=\"{}\"/>\n",
                escape_xml(name)
            ));
        }
        xml.push_str("    </product>\n");
    }
    xml.push_str("  </sum-of-products>\n");

    if let Some(result) = tree.uncertainty {
        xml.push_str(&format!(
            "  <uncertainty top-event=\"{}\" trials=\"{}\" mean=\"{}\" sigma=\"{}\">\n",
            escape_xml(analysis.top_name()),
            result.trials,
            result.mean,
            result.sigma
        ));
        xml.push_str(&format!(
            "    <confidence-interval level=\"0.95\" lower=\"{}\" upper=\"{}\"/>\n",
            result.confidence_interval.0, result.confidence_interval.1
        ));
        xml.push_str("    <histogram>\n");
        for (lower_bound, density) in &result.distribution {
            xml.push_str(&format!(
                "      <bin lower-bound=\"{}\" density=\"{}\"/>\n",
                lower_bound, density
            ));
        }
        xml.push_str("    </histogram>\n");
        xml.push_str("  </uncertainty>\n");
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
