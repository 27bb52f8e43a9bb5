use chatflow_core::{
    Block, Bubble, ChoiceItem, Edge, EdgeSource, EdgeTarget, HttpMethod, InputKind, InputStep,
    IntegrationStep, LogicStep, Step, StepKind, Typebot, Variable, Webhook,
};

pub fn start_step(id: &str, block_id: &str, edge: Option<&str>) -> Step {
    let step = Step::new(id, block_id, StepKind::Start);
    match edge {
        Some(edge) => step.with_edge(edge),
        None => step,
    }
}

pub fn text_bubble(id: &str, block_id: &str, content: &str) -> Step {
    Step::new(
        id,
        block_id,
        StepKind::Bubble {
            bubble: Bubble::Text {
                content: content.to_string(),
            },
        },
    )
}

pub fn text_input(id: &str, block_id: &str) -> Step {
    input(id, block_id, InputStep::new(InputKind::Text { is_long: false }))
}

pub fn email_input(id: &str, block_id: &str, retry_message: &str) -> Step {
    input(
        id,
        block_id,
        InputStep::new(InputKind::Email).with_retry_message(retry_message),
    )
}

/// Single-choice input. Item ids are `<id>-<n>`.
pub fn choice_input(id: &str, block_id: &str, items: &[(&str, Option<&str>)]) -> Step {
    let items = items
        .iter()
        .enumerate()
        .map(|(n, (content, edge))| ChoiceItem {
            id: format!("{}-{}", id, n),
            content: content.to_string(),
            outgoing_edge_id: edge.map(str::to_string),
        })
        .collect();
    input(
        id,
        block_id,
        InputStep::new(InputKind::Choice {
            items,
            is_multiple_choice: false,
        }),
    )
}

fn input(id: &str, block_id: &str, input: InputStep) -> Step {
    Step::new(id, block_id, StepKind::Input { input })
}

/// Bind an input step to a variable. Other steps are returned unchanged.
pub fn bind(mut step: Step, variable_id: &str) -> Step {
    if let StepKind::Input { input } = &mut step.kind {
        input.variable_id = Some(variable_id.to_string());
    }
    step
}

pub fn set_variable(id: &str, block_id: &str, variable_id: &str, expression: &str) -> Step {
    logic(
        id,
        block_id,
        LogicStep::SetVariable {
            variable_id: Some(variable_id.to_string()),
            expression: expression.to_string(),
        },
    )
}

pub fn typebot_link(id: &str, block_id: &str, typebot_id: &str, target_block: Option<&str>) -> Step {
    logic(
        id,
        block_id,
        LogicStep::TypebotLink {
            typebot_id: Some(typebot_id.to_string()),
            block_id: target_block.map(str::to_string),
        },
    )
}

fn logic(id: &str, block_id: &str, logic: LogicStep) -> Step {
    Step::new(id, block_id, StepKind::Logic { logic })
}

pub fn webhook(id: &str, block_id: &str, url: &str) -> Step {
    Step::new(
        id,
        block_id,
        StepKind::Integration {
            integration: IntegrationStep::Webhook {
                webhook: Webhook {
                    method: HttpMethod::Post,
                    url: Some(url.to_string()),
                    headers: Vec::new(),
                    query_params: Vec::new(),
                    body: None,
                },
                response_variable_mapping: Vec::new(),
            },
        },
    )
}

/// A block titled after its id.
pub fn block(id: &str, steps: Vec<Step>) -> Block {
    Block {
        id: id.to_string(),
        title: id.to_string(),
        steps,
    }
}

pub fn titled(mut block: Block, title: &str) -> Block {
    block.title = title.to_string();
    block
}

/// Block-to-block edge.
pub fn edge(id: &str, from_block: &str, to_block: &str) -> Edge {
    Edge {
        id: id.to_string(),
        from: EdgeSource {
            block_id: from_block.to_string(),
            step_id: None,
            item_id: None,
        },
        to: EdgeTarget::block(to_block),
    }
}

pub fn edge_to_step(id: &str, from_block: &str, to_block: &str, step_id: &str) -> Edge {
    Edge {
        to: EdgeTarget::Block {
            block_id: to_block.to_string(),
            step_id: Some(step_id.to_string()),
        },
        ..edge(id, from_block, to_block)
    }
}

pub fn edge_to_typebot(id: &str, from_block: &str, typebot_id: &str, block_id: Option<&str>) -> Edge {
    Edge {
        to: EdgeTarget::Typebot {
            typebot_id: typebot_id.to_string(),
            block_id: block_id.map(str::to_string),
        },
        ..edge(id, from_block, "")
    }
}

/// Fluent typebot construction for tests.
pub struct TypebotBuilder {
    typebot: Typebot,
}

impl TypebotBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            typebot: Typebot {
                id: id.to_string(),
                name: id.to_string(),
                blocks: Vec::new(),
                edges: Vec::new(),
                variables: Vec::new(),
                theme: serde_json::Value::Null,
            },
        }
    }

    pub fn block(mut self, block: Block) -> Self {
        self.typebot.blocks.push(block);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.typebot.edges.push(edge);
        self
    }

    pub fn variable(mut self, id: &str, name: &str) -> Self {
        self.typebot.variables.push(Variable::new(id, name));
        self
    }

    pub fn build(self) -> Typebot {
        self.typebot
    }
}
