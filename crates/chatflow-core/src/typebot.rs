use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A conversational flow graph: blocks of steps connected by edges.
///
/// Immutable during a traversal; only variable values change, and those live
/// in the conversation's `VariableStore`, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typebot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Display configuration, opaque to the engine.
    #[serde(default)]
    pub theme: serde_json::Value,
}

impl Typebot {
    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == id)
    }

    /// The block holding the synthetic start step.
    pub fn start_block(&self) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.steps.iter().any(|s| matches!(s.kind, StepKind::Start)))
    }

    /// Find a step anywhere in the graph.
    pub fn find_step(&self, step_id: &str) -> Option<&Step> {
        self.blocks
            .iter()
            .flat_map(|b| b.steps.iter())
            .find(|s| s.id == step_id)
    }
}

/// An ordered group of steps rendered as one continuous chat segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub steps: Vec<Step>,
}

impl Block {
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

/// A single node of the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub block_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(id: impl Into<String>, block_id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            block_id: block_id.into(),
            outgoing_edge_id: None,
            kind,
        }
    }

    /// Set the default outgoing edge.
    pub fn with_edge(mut self, edge_id: impl Into<String>) -> Self {
        self.outgoing_edge_id = Some(edge_id.into());
        self
    }

    pub fn is_bubble(&self) -> bool {
        matches!(self.kind, StepKind::Bubble { .. })
    }

    pub fn input(&self) -> Option<&InputStep> {
        match &self.kind {
            StepKind::Input { input } => Some(input),
            _ => None,
        }
    }

    pub fn bubble(&self) -> Option<&Bubble> {
        match &self.kind {
            StepKind::Bubble { bubble } => Some(bubble),
            _ => None,
        }
    }
}

/// The step variants. Matching on this is exhaustive by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepKind {
    /// Synthetic entry marker, never rendered.
    Start,
    Bubble { bubble: Bubble },
    Input { input: InputStep },
    Logic { logic: LogicStep },
    Integration { integration: IntegrationStep },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Start => "start",
            StepKind::Bubble { .. } => "bubble",
            StepKind::Input { .. } => "input",
            StepKind::Logic { .. } => "logic",
            StepKind::Integration { .. } => "integration",
        }
    }
}

/// Informational content shown by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Bubble {
    /// Plain text; `{{Variable name}}` placeholders are substituted when rendered.
    Text { content: String },
    Image { url: String },
    Video { url: String },
    Embed {
        url: String,
        #[serde(default)]
        height: Option<u32>,
    },
}

/// A prompt for a user response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputStep {
    #[serde(flatten)]
    pub kind: InputKind,
    /// Variable receiving the answer.
    #[serde(default)]
    pub variable_id: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    /// Message shown before asking again when the answer is rejected.
    #[serde(default)]
    pub retry_message: Option<String>,
}

impl InputStep {
    pub fn new(kind: InputKind) -> Self {
        Self {
            kind,
            variable_id: None,
            placeholder: None,
            retry_message: None,
        }
    }

    pub fn with_variable(mut self, variable_id: impl Into<String>) -> Self {
        self.variable_id = Some(variable_id.into());
        self
    }

    pub fn with_retry_message(mut self, message: impl Into<String>) -> Self {
        self.retry_message = Some(message.into());
        self
    }

    pub fn can_be_retried(&self) -> bool {
        self.retry_message.is_some()
    }

    /// Whether answers select exactly one choice item and branch on it.
    pub fn is_single_choice(&self) -> bool {
        matches!(
            self.kind,
            InputKind::Choice {
                is_multiple_choice: false,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InputKind {
    Text {
        #[serde(default)]
        is_long: bool,
    },
    Number,
    Email,
    Url,
    Date,
    Phone,
    Choice {
        items: Vec<ChoiceItem>,
        #[serde(default)]
        is_multiple_choice: bool,
    },
}

impl InputKind {
    /// Check an answer against the kind's format. Kinds without a format accept anything.
    pub fn validate(&self, answer: &str) -> bool {
        let answer = answer.trim();
        match self {
            InputKind::Email => email_regex().is_match(answer),
            InputKind::Url => url_regex().is_match(answer),
            InputKind::Phone => phone_regex().is_match(answer),
            InputKind::Number => answer.parse::<f64>().is_ok(),
            _ => true,
        }
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid regex"))
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9][0-9 ().-]{5,}$").expect("valid regex"))
}

/// A selectable item of a choice input, with its own outgoing edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceItem {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
}

/// Local computation performed without a visible chat artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LogicStep {
    SetVariable {
        variable_id: Option<String>,
        #[serde(default)]
        expression: String,
    },
    Condition {
        items: Vec<ConditionItem>,
    },
    Redirect {
        url: Option<String>,
        #[serde(default)]
        is_new_tab: bool,
    },
    /// Inject another typebot. `typebot_id` may be `"current"`.
    TypebotLink {
        typebot_id: Option<String>,
        block_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionItem {
    pub id: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub comparisons: Vec<Comparison>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    #[serde(default)]
    pub variable_id: Option<String>,
    #[serde(default)]
    pub operator: Option<ComparisonOperator>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    Contains,
    GreaterThan,
    LessThan,
    IsSet,
}

/// External side-effecting call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IntegrationStep {
    Webhook {
        webhook: Webhook,
        #[serde(default)]
        response_variable_mapping: Vec<ResponseVariableMapping>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    #[serde(default)]
    pub query_params: Vec<KeyValue>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseVariableMapping {
    /// Dot path into the JSON response, e.g. `data.user.name` or `items.0.id`.
    #[serde(default)]
    pub body_path: Option<String>,
    #[serde(default)]
    pub variable_id: Option<String>,
}

/// A directed link from a step (or one of its choice items) to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: EdgeSource,
    pub to: EdgeTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSource {
    pub block_id: String,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
}

/// Where an edge leads: a block of the same typebot, optionally starting at a
/// given step, or a block of another typebot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum EdgeTarget {
    Typebot {
        typebot_id: String,
        #[serde(default)]
        block_id: Option<String>,
    },
    Block {
        block_id: String,
        #[serde(default)]
        step_id: Option<String>,
    },
}

impl EdgeTarget {
    pub fn block(block_id: impl Into<String>) -> Self {
        EdgeTarget::Block {
            block_id: block_id.into(),
            step_id: None,
        }
    }

    /// The target block id within the target graph, if one is named.
    pub fn block_id(&self) -> Option<&str> {
        match self {
            EdgeTarget::Block { block_id, .. } => Some(block_id),
            EdgeTarget::Typebot { block_id, .. } => block_id.as_deref(),
        }
    }
}

/// A named conversation variable. `value` is untyped text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl Variable {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_deserialization() {
        let json = r#"{
            "id": "s1",
            "blockId": "b1",
            "outgoingEdgeId": "e1",
            "type": "input",
            "input": { "type": "choice", "items": [
                { "id": "i1", "content": "Yes", "outgoingEdgeId": "e2" }
            ], "variableId": "v1" }
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.outgoing_edge_id.as_deref(), Some("e1"));
        let input = step.input().unwrap();
        assert_eq!(input.variable_id.as_deref(), Some("v1"));
        assert!(input.is_single_choice());
        match &input.kind {
            InputKind::Choice { items, .. } => {
                assert_eq!(items[0].outgoing_edge_id.as_deref(), Some("e2"))
            }
            other => panic!("expected choice, got {:?}", other),
        }
    }

    #[test]
    fn test_start_step_and_start_block() {
        let json = r#"{
            "id": "t1",
            "blocks": [
                { "id": "b0", "title": "Start", "steps": [
                    { "id": "s0", "blockId": "b0", "type": "start", "outgoingEdgeId": "e0" }
                ]},
                { "id": "b1", "title": "Hello", "steps": [
                    { "id": "s1", "blockId": "b1", "type": "bubble",
                      "bubble": { "type": "text", "content": "Hi" } }
                ]}
            ],
            "edges": [ { "id": "e0", "from": { "blockId": "b0", "stepId": "s0" }, "to": { "blockId": "b1" } } ]
        }"#;
        let typebot: Typebot = serde_json::from_str(json).unwrap();
        assert_eq!(typebot.start_block().unwrap().id, "b0");
        assert!(typebot.find_step("s1").unwrap().is_bubble());
        assert_eq!(typebot.edge("e0").unwrap().to, EdgeTarget::block("b1"));
    }

    #[test]
    fn test_edge_target_typebot() {
        let json = r#"{ "id": "e1", "from": { "blockId": "b1" }, "to": { "typebotId": "other", "blockId": "x" } }"#;
        let edge: Edge = serde_json::from_str(json).unwrap();
        assert!(matches!(edge.to, EdgeTarget::Typebot { ref typebot_id, .. } if typebot_id == "other"));
        assert_eq!(edge.to.block_id(), Some("x"));
    }

    #[test]
    fn test_logic_step_deserialization() {
        let json = r#"{ "type": "typebotLink", "typebotId": "current", "blockId": "b2" }"#;
        let logic: LogicStep = serde_json::from_str(json).unwrap();
        assert_eq!(
            logic,
            LogicStep::TypebotLink {
                typebot_id: Some("current".into()),
                block_id: Some("b2".into()),
            }
        );
    }

    #[test]
    fn test_input_validation() {
        assert!(InputKind::Email.validate("jane@example.com"));
        assert!(!InputKind::Email.validate("jane@example"));
        assert!(InputKind::Url.validate("https://example.com/path"));
        assert!(!InputKind::Url.validate("example dot com"));
        assert!(InputKind::Phone.validate("+33 6 65 56 67 73"));
        assert!(!InputKind::Phone.validate("call me"));
        assert!(InputKind::Number.validate("42.5"));
        assert!(InputKind::Text { is_long: false }.validate("anything"));
    }

    #[test]
    fn test_multiple_choice_is_not_single_choice() {
        let input = InputStep::new(InputKind::Choice {
            items: vec![],
            is_multiple_choice: true,
        });
        assert!(!input.is_single_choice());
        assert!(!input.can_be_retried());
        assert!(InputStep::new(InputKind::Email)
            .with_retry_message("Try again")
            .can_be_retried());
    }
}
