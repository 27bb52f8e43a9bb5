use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use chatflow_core::config::DisplayConfig;
use chatflow_core::error::FlowError;
use chatflow_core::log::{LogEntry, LogStatus};
use chatflow_core::{Bubble, InputKind, InputStep, VariableStore};
use chatflow_engine::{Conversation, Turn};

/// Drive a conversation from stdin/stdout until it completes, stdin closes
/// or Ctrl-C cancels it.
pub async fn run(
    conversation: &mut Conversation,
    display: &DisplayConfig,
    mut logs: Option<UnboundedReceiver<LogEntry>>,
) -> anyhow::Result<()> {
    let cancel = conversation.cancellation_token();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let delay = Duration::from_millis(display.bubble_delay_ms);
    let mut turn = conversation.start().await;

    loop {
        if let Some(rx) = logs.as_mut() {
            while let Ok(entry) = rx.try_recv() {
                println!("{}", render_log(&entry));
            }
        }

        let current = match turn {
            Ok(current) => current,
            Err(FlowError::Cancelled) => {
                println!("\n(conversation cancelled)");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        turn = match current {
            Turn::Display(step) => {
                if let Some(bubble) = step.bubble() {
                    println!("bot> {}", render_bubble(bubble, conversation.variables()));
                }
                tokio::select! {
                    _ = cancel.cancelled() => Err(FlowError::Cancelled),
                    _ = tokio::time::sleep(delay) => conversation.step_settled().await,
                }
            }
            Turn::AwaitAnswer(step) => {
                let Some(input) = step.input() else {
                    return Err(FlowError::StepNotFound(step.id.clone()).into());
                };
                print_prompt(input, conversation.variables())?;

                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        turn = Err(FlowError::Cancelled);
                        continue;
                    }
                    line = lines.next_line() => line?,
                };
                let Some(line) = line else {
                    println!();
                    return Ok(());
                };

                match resolve_answer(input, line.trim()) {
                    Some(answer) => conversation.submit_answer(answer).await,
                    None if input.can_be_retried() => conversation.request_retry().await,
                    None => {
                        println!("bot> That answer doesn't look right, try again.");
                        Ok(Turn::AwaitAnswer(step))
                    }
                }
            }
            Turn::Completed => {
                println!("(end of conversation)");
                return Ok(());
            }
        };
    }
}

fn render_bubble(bubble: &Bubble, variables: &VariableStore) -> String {
    match bubble {
        Bubble::Text { content } => variables.parse(content),
        Bubble::Image { url } => format!("[image] {}", variables.parse(url)),
        Bubble::Video { url } => format!("[video] {}", variables.parse(url)),
        Bubble::Embed { url, .. } => format!("[embed] {}", variables.parse(url)),
    }
}

fn print_prompt(input: &InputStep, variables: &VariableStore) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    if let InputKind::Choice {
        items,
        is_multiple_choice,
    } = &input.kind
    {
        for (n, item) in items.iter().enumerate() {
            writeln!(stdout, "  {}. {}", n + 1, item.content)?;
        }
        if *is_multiple_choice {
            writeln!(stdout, "  (pick several, separated by commas)")?;
        }
    }
    if let Some(placeholder) = &input.placeholder {
        write!(stdout, "[{}] ", variables.parse(placeholder))?;
    }
    write!(stdout, "you> ")?;
    stdout.flush()
}

/// Turn a raw line into the answer to submit. `None` means the line is not a
/// valid answer for the input's format.
fn resolve_answer(input: &InputStep, raw: &str) -> Option<String> {
    match &input.kind {
        InputKind::Choice {
            items,
            is_multiple_choice,
        } => {
            let pick = |token: &str| -> String {
                token
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| items.get(i))
                    .map(|item| item.content.clone())
                    .unwrap_or_else(|| token.trim().to_string())
            };
            if *is_multiple_choice {
                Some(raw.split(',').map(pick).collect::<Vec<_>>().join(", "))
            } else {
                Some(pick(raw))
            }
        }
        kind if kind.validate(raw) => Some(raw.to_string()),
        _ => None,
    }
}

fn render_log(entry: &LogEntry) -> String {
    let status = match entry.status {
        LogStatus::Success => "ok",
        LogStatus::Error => "error",
        LogStatus::Info => "info",
    };
    match &entry.details {
        Some(details) => format!("  [{}] {}: {}", status, entry.description, details),
        None => format!("  [{}] {}", status, entry.description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatflow_core::{ChoiceItem, Variable};

    fn choice(multiple: bool) -> InputStep {
        InputStep::new(InputKind::Choice {
            items: ["Red", "Green", "Blue"]
                .iter()
                .enumerate()
                .map(|(i, c)| ChoiceItem {
                    id: format!("i{}", i),
                    content: c.to_string(),
                    outgoing_edge_id: None,
                })
                .collect(),
            is_multiple_choice: multiple,
        })
    }

    #[test]
    fn test_numbered_choice() {
        assert_eq!(resolve_answer(&choice(false), "2").as_deref(), Some("Green"));
        assert_eq!(resolve_answer(&choice(false), "Blue").as_deref(), Some("Blue"));
        assert_eq!(resolve_answer(&choice(false), "9").as_deref(), Some("9"));
        assert_eq!(resolve_answer(&choice(false), "0").as_deref(), Some("0"));
        assert_eq!(
            resolve_answer(&choice(true), "1, 3").as_deref(),
            Some("Red, Blue")
        );
    }

    #[test]
    fn test_format_validation() {
        let email = InputStep::new(InputKind::Email);
        assert_eq!(resolve_answer(&email, "nope"), None);
        assert_eq!(
            resolve_answer(&email, "ada@example.com").as_deref(),
            Some("ada@example.com")
        );
        let text = InputStep::new(InputKind::Text { is_long: false });
        assert_eq!(resolve_answer(&text, "anything").as_deref(), Some("anything"));
    }

    #[test]
    fn test_render_bubble_substitutes_variables() {
        let mut vars = VariableStore::from_variables(&[Variable::new("v", "Name")]);
        vars.update_variable_value("v", "Ada");
        let text = Bubble::Text {
            content: "Hi {{Name}}".into(),
        };
        assert_eq!(render_bubble(&text, &vars), "Hi Ada");
        let image = Bubble::Image {
            url: "https://img/{{Name}}.png".into(),
        };
        assert_eq!(render_bubble(&image, &vars), "[image] https://img/Ada.png");
    }

    #[test]
    fn test_render_log() {
        let entry = LogEntry::error("Webhook returned an error").with_details("HTTP 500");
        assert_eq!(
            render_log(&entry),
            "  [error] Webhook returned an error: HTTP 500"
        );
    }
}
