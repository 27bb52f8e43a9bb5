use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use tracing::{debug, info, warn};

use chatflow_core::context::{LinkedTypebot, LogicContext, LogicOutcome};
use chatflow_core::error::Result;
use chatflow_core::log::LogEntry;
use chatflow_core::traits::LogicExecutor;
use chatflow_core::{
    Comparison, ComparisonOperator, ConditionItem, LogicStep, LogicalOperator, Step,
    VariableStore,
};

/// Typebot id that refers to the typebot currently being traversed.
pub const CURRENT_TYPEBOT: &str = "current";

/// Built-in logic: variable assignment, conditions, redirects and typebot links.
#[derive(Debug, Default, Clone)]
pub struct DefaultLogicExecutor;

impl DefaultLogicExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl LogicExecutor for DefaultLogicExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a Step,
        logic: &'a LogicStep,
        ctx: &'a mut LogicContext,
    ) -> BoxFuture<'a, Result<LogicOutcome>> {
        Box::pin(async move {
            match logic {
                LogicStep::SetVariable {
                    variable_id,
                    expression,
                } => {
                    if let Some(variable_id) = variable_id {
                        let value = evaluate_expression(expression, ctx.variables());
                        debug!(step_id = %step.id, variable_id = %variable_id, "Setting variable");
                        ctx.update_variable_value(variable_id, value);
                    }
                    Ok(LogicOutcome::default())
                }
                LogicStep::Condition { items } => {
                    let passing = items
                        .iter()
                        .find(|item| item_passes(item, ctx.variables()));
                    Ok(LogicOutcome::next(
                        passing.and_then(|item| item.outgoing_edge_id.clone()),
                    ))
                }
                LogicStep::Redirect { url, is_new_tab } => {
                    if let Some(url) = url {
                        let url = ctx.variables().parse(url);
                        info!(step_id = %step.id, url = %url, "Redirect requested");
                        ctx.on_new_log(
                            LogEntry::info(format!("Redirect to {}", url))
                                .with_details(if *is_new_tab { "new tab" } else { "same tab" }),
                        );
                    }
                    Ok(LogicOutcome::default())
                }
                LogicStep::TypebotLink {
                    typebot_id,
                    block_id,
                } => link_typebot(step, typebot_id.as_deref(), block_id.clone(), ctx).await,
            }
        })
    }
}

async fn link_typebot(
    step: &Step,
    typebot_id: Option<&str>,
    block_id: Option<String>,
    ctx: &mut LogicContext,
) -> Result<LogicOutcome> {
    let Some(typebot_id) = typebot_id else {
        ctx.on_new_log(LogEntry::error("Failed to link typebot").with_details("No typebot id"));
        return Ok(LogicOutcome::next(step.outgoing_edge_id.clone()));
    };

    let resolved = if typebot_id == CURRENT_TYPEBOT {
        Some(ctx.typebot.clone())
    } else if let Some(known) = ctx.known_typebot(typebot_id) {
        Some(known)
    } else {
        match ctx.lookup.get_typebot(typebot_id).await {
            Ok(found) => found.map(Arc::new),
            Err(e) => {
                warn!(typebot_id, error = %e, "Typebot lookup failed");
                None
            }
        }
    };

    match resolved {
        Some(typebot) => {
            debug!(step_id = %step.id, typebot_id = %typebot.id, "Linking typebot");
            Ok(LogicOutcome::link(LinkedTypebot { typebot, block_id }))
        }
        None => {
            ctx.on_new_log(
                LogEntry::error("Failed to link typebot")
                    .with_details(format!("Typebot {} not found", typebot_id)),
            );
            Ok(LogicOutcome::next(step.outgoing_edge_id.clone()))
        }
    }
}

fn arithmetic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*([-+*/])\s*(-?\d+(?:\.\d+)?)\s*$").expect("valid regex")
    })
}

/// Substitute variables, then evaluate a single binary arithmetic operation
/// if that is what the text is. Anything else is kept verbatim.
pub fn evaluate_expression(expression: &str, variables: &VariableStore) -> String {
    let text = variables.parse(expression);
    let Some(caps) = arithmetic_regex().captures(&text) else {
        return text;
    };
    let (Ok(lhs), Ok(rhs)) = (caps[1].parse::<f64>(), caps[3].parse::<f64>()) else {
        return text;
    };
    let result = match &caps[2] {
        "+" => lhs + rhs,
        "-" => lhs - rhs,
        "*" => lhs * rhs,
        "/" if rhs != 0.0 => lhs / rhs,
        _ => return text,
    };
    format_number(result)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn item_passes(item: &ConditionItem, variables: &VariableStore) -> bool {
    if item.comparisons.is_empty() {
        return false;
    }
    let mut results = item.comparisons.iter().map(|c| compare(c, variables));
    match item.logical_operator {
        LogicalOperator::And => results.all(|passed| passed),
        LogicalOperator::Or => results.any(|passed| passed),
    }
}

fn compare(comparison: &Comparison, variables: &VariableStore) -> bool {
    let (Some(variable_id), Some(operator)) = (&comparison.variable_id, comparison.operator)
    else {
        return false;
    };
    let actual = variables.value(variable_id).unwrap_or_default();
    let expected = comparison
        .value
        .as_deref()
        .map(|v| variables.parse(v))
        .unwrap_or_default();

    match operator {
        ComparisonOperator::IsSet => !actual.is_empty(),
        ComparisonOperator::Equal => actual == expected,
        ComparisonOperator::NotEqual => actual != expected,
        ComparisonOperator::Contains => actual.contains(expected.as_str()),
        ComparisonOperator::GreaterThan => numeric(actual, &expected).is_some_and(|(a, b)| a > b),
        ComparisonOperator::LessThan => numeric(actual, &expected).is_some_and(|(a, b)| a < b),
    }
}

fn numeric(a: &str, b: &str) -> Option<(f64, f64)> {
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatflow_core::{StepKind, Typebot, Variable};
    use chatflow_test_utils::fixtures::TypebotBuilder;
    use chatflow_test_utils::RecordingLogSink;

    use crate::lookup::InMemoryTypebots;

    fn store() -> VariableStore {
        let mut store = VariableStore::from_variables(&[
            Variable::new("age", "Age"),
            Variable::new("name", "Name"),
            Variable::new("out", "Out"),
        ]);
        store.update_variable_value("age", "30");
        store.update_variable_value("name", "Ada");
        store
    }

    fn context(lookup: InMemoryTypebots, log: Arc<RecordingLogSink>) -> LogicContext {
        let root = Arc::new(TypebotBuilder::new("root").build());
        LogicContext::new(root, store(), Arc::new(lookup), log)
    }

    fn step(logic: LogicStep) -> Step {
        Step::new("l1", "b1", StepKind::Logic { logic }).with_edge("OWN")
    }

    async fn run(logic: LogicStep, ctx: &mut LogicContext) -> LogicOutcome {
        let step = step(logic.clone());
        DefaultLogicExecutor::new()
            .execute(&step, &logic, ctx)
            .await
            .unwrap()
    }

    fn comparison(variable: &str, operator: ComparisonOperator, value: &str) -> Comparison {
        Comparison {
            variable_id: Some(variable.into()),
            operator: Some(operator),
            value: Some(value.into()),
        }
    }

    #[test]
    fn test_evaluate_expression() {
        let vars = store();
        assert_eq!(evaluate_expression("{{Age}} + 1", &vars), "31");
        assert_eq!(evaluate_expression("{{Age}} / 4", &vars), "7.5");
        assert_eq!(evaluate_expression("{{Age}} * -2", &vars), "-60");
        assert_eq!(evaluate_expression("Hello {{Name}}", &vars), "Hello Ada");
        assert_eq!(evaluate_expression("1 / 0", &vars), "1 / 0");
    }

    #[test]
    fn test_comparisons() {
        let vars = store();
        assert!(compare(&comparison("age", ComparisonOperator::GreaterThan, "18"), &vars));
        assert!(!compare(&comparison("age", ComparisonOperator::LessThan, "18"), &vars));
        assert!(compare(&comparison("name", ComparisonOperator::Contains, "d"), &vars));
        assert!(compare(&comparison("name", ComparisonOperator::Equal, "{{Name}}"), &vars));
        assert!(!compare(&comparison("out", ComparisonOperator::IsSet, ""), &vars));
        assert!(!compare(&comparison("name", ComparisonOperator::GreaterThan, "1"), &vars));
    }

    #[tokio::test]
    async fn test_set_variable_is_staged() {
        let log = Arc::new(RecordingLogSink::default());
        let mut ctx = context(InMemoryTypebots::new(), log);
        let outcome = run(
            LogicStep::SetVariable {
                variable_id: Some("out".into()),
                expression: "{{Age}} - 10".into(),
            },
            &mut ctx,
        )
        .await;
        assert_eq!(outcome, LogicOutcome::default());
        assert_eq!(ctx.variables().value("out"), Some("20"));
        let effects = ctx.into_effects();
        assert_eq!(effects.variable_updates.len(), 1);
        assert_eq!(effects.variable_updates[0].value, "20");
    }

    #[tokio::test]
    async fn test_condition_picks_first_passing_item() {
        let log = Arc::new(RecordingLogSink::default());
        let mut ctx = context(InMemoryTypebots::new(), log);
        let items = vec![
            ConditionItem {
                id: "c1".into(),
                logical_operator: LogicalOperator::And,
                comparisons: vec![
                    comparison("age", ComparisonOperator::GreaterThan, "18"),
                    comparison("name", ComparisonOperator::Equal, "Bob"),
                ],
                outgoing_edge_id: Some("E1".into()),
            },
            ConditionItem {
                id: "c2".into(),
                logical_operator: LogicalOperator::Or,
                comparisons: vec![
                    comparison("name", ComparisonOperator::Equal, "Bob"),
                    comparison("age", ComparisonOperator::IsSet, ""),
                ],
                outgoing_edge_id: Some("E2".into()),
            },
        ];
        let outcome = run(LogicStep::Condition { items }, &mut ctx).await;
        assert_eq!(outcome.next_edge_id.as_deref(), Some("E2"));
    }

    #[tokio::test]
    async fn test_condition_without_match_defers_to_step_edge() {
        let log = Arc::new(RecordingLogSink::default());
        let mut ctx = context(InMemoryTypebots::new(), log);
        let items = vec![ConditionItem {
            id: "c1".into(),
            logical_operator: LogicalOperator::And,
            comparisons: vec![comparison("age", ComparisonOperator::LessThan, "5")],
            outgoing_edge_id: Some("E1".into()),
        }];
        let outcome = run(LogicStep::Condition { items }, &mut ctx).await;
        assert_eq!(outcome, LogicOutcome::default());
    }

    #[tokio::test]
    async fn test_redirect_logs() {
        let log = Arc::new(RecordingLogSink::default());
        let mut ctx = context(InMemoryTypebots::new(), log.clone());
        run(
            LogicStep::Redirect {
                url: Some("https://example.com/{{Name}}".into()),
                is_new_tab: true,
            },
            &mut ctx,
        )
        .await;
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].description, "Redirect to https://example.com/Ada");
    }

    #[tokio::test]
    async fn test_link_current_typebot() {
        let log = Arc::new(RecordingLogSink::default());
        let mut ctx = context(InMemoryTypebots::new(), log);
        let outcome = run(
            LogicStep::TypebotLink {
                typebot_id: Some(CURRENT_TYPEBOT.into()),
                block_id: Some("b2".into()),
            },
            &mut ctx,
        )
        .await;
        let linked = outcome.linked_typebot.unwrap();
        assert_eq!(linked.typebot.id, "root");
        assert_eq!(linked.block_id.as_deref(), Some("b2"));
    }

    #[tokio::test]
    async fn test_link_prefers_known_then_lookup() {
        let log = Arc::new(RecordingLogSink::default());
        let mut lookup = InMemoryTypebots::new();
        lookup.insert(Typebot {
            name: "From lookup".into(),
            ..TypebotBuilder::new("child").build()
        });
        let mut ctx = context(lookup, log).with_linked_typebots(vec![Arc::new(Typebot {
            name: "Known".into(),
            ..TypebotBuilder::new("child").build()
        })]);
        let outcome = run(
            LogicStep::TypebotLink {
                typebot_id: Some("child".into()),
                block_id: None,
            },
            &mut ctx,
        )
        .await;
        assert_eq!(outcome.linked_typebot.unwrap().typebot.name, "Known");

        ctx.linked_typebots.clear();
        let outcome = run(
            LogicStep::TypebotLink {
                typebot_id: Some("child".into()),
                block_id: None,
            },
            &mut ctx,
        )
        .await;
        assert_eq!(outcome.linked_typebot.unwrap().typebot.name, "From lookup");
    }

    #[tokio::test]
    async fn test_unresolved_link_logs_and_uses_own_edge() {
        let log = Arc::new(RecordingLogSink::default());
        let mut ctx = context(InMemoryTypebots::new(), log.clone());
        let outcome = run(
            LogicStep::TypebotLink {
                typebot_id: Some("ghost".into()),
                block_id: None,
            },
            &mut ctx,
        )
        .await;
        assert_eq!(outcome, LogicOutcome::next(Some("OWN".into())));
        let entries = log.entries();
        assert_eq!(entries[0].description, "Failed to link typebot");
        assert_eq!(entries[0].status, chatflow_core::LogStatus::Error);
    }
}
