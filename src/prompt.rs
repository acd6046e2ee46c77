use async_trait::async_trait;

/// Button identifier for accepting a batch of manual operations.
pub const BUTTON_RUN: &str = "run";
/// Button identifier for postponing a batch of manual operations.
pub const BUTTON_LATER: &str = "later";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptButton {
    pub id: &'static str,
    pub label: &'static str,
}

pub const MANUAL_BATCH_BUTTONS: [PromptButton; 2] = [
    PromptButton {
        id: BUTTON_RUN,
        label: "Run now",
    },
    PromptButton {
        id: BUTTON_LATER,
        label: "Later",
    },
];

/// Asks the user to pick one of `buttons`. Awaiting the answer is a suspension
/// point; implementations must not block the runtime while waiting.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn show(&self, title: &str, body: &str, buttons: &[PromptButton]) -> String;
}

/// Always answers with the same button.
pub struct FixedPrompt {
    answer: &'static str,
}

impl FixedPrompt {
    pub fn accept() -> Self {
        Self { answer: BUTTON_RUN }
    }

    pub fn decline() -> Self {
        Self {
            answer: BUTTON_LATER,
        }
    }
}

#[async_trait]
impl ConfirmationPrompt for FixedPrompt {
    async fn show(&self, _title: &str, _body: &str, _buttons: &[PromptButton]) -> String {
        self.answer.to_owned()
    }
}

/// Interactive prompt on stdin/stdout.
pub struct ConsolePrompt;

#[async_trait]
impl ConfirmationPrompt for ConsolePrompt {
    async fn show(&self, title: &str, body: &str, buttons: &[PromptButton]) -> String {
        let default = buttons.last().map(|b| b.id).unwrap_or(BUTTON_LATER);
        let choices: Vec<String> = buttons
            .iter()
            .enumerate()
            .map(|(idx, b)| format!("[{}] {}", idx + 1, b.label))
            .collect();
        let ids: Vec<&'static str> = buttons.iter().map(|b| b.id).collect();
        let text = format!("\n{}\n\n{}\n\n{} > ", title, body, choices.join("  "));

        let answer = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            print!("{}", text);
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(_) => line.trim().to_owned(),
                Err(_) => String::new(),
            }
        })
        .await
        .unwrap_or_default();

        choice_to_id(&answer, &ids).unwrap_or(default).to_owned()
    }
}

/// Map a typed answer (a 1-based index or a button id) to a button id.
fn choice_to_id(answer: &str, ids: &[&'static str]) -> Option<&'static str> {
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| ids.get(i)).copied();
    }
    ids.iter().copied().find(|id| id.eq_ignore_ascii_case(answer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_prompt() {
        assert_eq!(
            FixedPrompt::accept().show("t", "b", &MANUAL_BATCH_BUTTONS).await,
            BUTTON_RUN
        );
        assert_eq!(
            FixedPrompt::decline().show("t", "b", &MANUAL_BATCH_BUTTONS).await,
            BUTTON_LATER
        );
    }

    #[test]
    fn test_choice_to_id() {
        let ids = [BUTTON_RUN, BUTTON_LATER];
        assert_eq!(choice_to_id("1", &ids), Some(BUTTON_RUN));
        assert_eq!(choice_to_id("2", &ids), Some(BUTTON_LATER));
        assert_eq!(choice_to_id("RUN", &ids), Some(BUTTON_RUN));
        assert_eq!(choice_to_id("0", &ids), None);
        assert_eq!(choice_to_id("", &ids), None);
    }
}
