use std::io::Write as _;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::locale::translate;

/// Answer recorded for one prompted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// How hard an item is to confirm. Strong items demand a literal echo of the
/// path (or `YES`) instead of a single keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStrength {
    Normal,
    Strong,
}

#[derive(Debug, Clone)]
pub struct PromptItem {
    /// Text shown to the user, typically the normalized path.
    pub label: String,
    pub strength: ConfirmStrength,
    /// Extra context line (classifier tier, resolver score).
    pub detail: Option<String>,
}

/// Confirmation policy derived before prompting starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPolicy {
    /// Ask for every item.
    Interactive,
    /// Auto-accept normal items; strong items still prompt when possible.
    AlwaysYes,
    /// Auto-reject everything (non-interactive default-deny).
    AlwaysNo,
}

#[derive(Debug, Clone)]
pub struct BatchDecision {
    pub decisions: Vec<Decision>,
    pub aborted: bool,
}

impl BatchDecision {
    fn all(count: usize, decision: Decision) -> Self {
        Self {
            decisions: vec![decision; count],
            aborted: false,
        }
    }
}

/// The seam between the safety gate and the terminal; tests drive the gate
/// through a scripted implementation.
pub trait Prompter {
    fn confirm_batch(&mut self, verb: &str, items: &[PromptItem]) -> BatchDecision;
}

/// Terminal prompter with default-deny timeouts. Reads stdin through a
/// detached reader thread so a silent user cannot hang the process past the
/// timeout.
pub struct ConsolePrompter {
    policy: PromptPolicy,
    timeout: Duration,
    strong_timeout: Duration,
}

impl ConsolePrompter {
    pub fn new(policy: PromptPolicy, timeout: Duration, strong_timeout: Duration) -> Self {
        Self {
            policy,
            timeout,
            strong_timeout,
        }
    }

    fn read_answer(&self, timeout: Duration) -> Option<String> {
        let receiver = stdin_lines();
        let guard = match receiver.lock() {
            Ok(guard) => guard,
            Err(_) => return None,
        };
        match guard.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn prompt_normal(&self, item: &PromptItem, verb: &str) -> ModalAnswer {
        if let Some(detail) = &item.detail {
            eprintln!("  {detail}");
        }
        eprint!("{verb} {}? {} ", item.label, translate("prompt.choices"));
        let _ = std::io::stderr().flush();
        let Some(line) = self.read_answer(self.timeout) else {
            eprintln!("{}", translate("prompt.timeout"));
            return ModalAnswer::Reject;
        };
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => ModalAnswer::Accept,
            "a" | "all" => ModalAnswer::AcceptAll,
            "r" => ModalAnswer::RejectAll,
            "q" | "quit" => ModalAnswer::Quit,
            _ => ModalAnswer::Reject,
        }
    }

    fn prompt_strong(&self, item: &PromptItem) -> ModalAnswer {
        if let Some(detail) = &item.detail {
            eprintln!("  {detail}");
        }
        eprintln!("{}", translate("prompt.strong"));
        eprint!("  {} > ", item.label);
        let _ = std::io::stderr().flush();
        let Some(line) = self.read_answer(self.strong_timeout) else {
            eprintln!("{}", translate("prompt.timeout"));
            return ModalAnswer::Reject;
        };
        let answer = line.trim();
        if answer == item.label || answer == "YES" {
            ModalAnswer::Accept
        } else if answer.eq_ignore_ascii_case("q") {
            ModalAnswer::Quit
        } else {
            ModalAnswer::Reject
        }
    }
}

enum ModalAnswer {
    Accept,
    Reject,
    AcceptAll,
    RejectAll,
    Quit,
}

impl Prompter for ConsolePrompter {
    fn confirm_batch(&mut self, verb: &str, items: &[PromptItem]) -> BatchDecision {
        match self.policy {
            PromptPolicy::AlwaysNo => return BatchDecision::all(items.len(), Decision::Reject),
            PromptPolicy::AlwaysYes => {
                // Strong items never ride along on a blanket yes.
                if items
                    .iter()
                    .all(|item| item.strength == ConfirmStrength::Normal)
                {
                    return BatchDecision::all(items.len(), Decision::Accept);
                }
            }
            PromptPolicy::Interactive => {}
        }

        let mut decisions = Vec::with_capacity(items.len());
        let mut blanket: Option<Decision> = match self.policy {
            PromptPolicy::AlwaysYes => Some(Decision::Accept),
            _ => None,
        };
        for item in items {
            if let Some(decision) = blanket {
                if item.strength == ConfirmStrength::Normal {
                    decisions.push(decision);
                    continue;
                }
                if decision == Decision::Reject {
                    decisions.push(Decision::Reject);
                    continue;
                }
            }
            let answer = match item.strength {
                ConfirmStrength::Normal => self.prompt_normal(item, verb),
                ConfirmStrength::Strong => self.prompt_strong(item),
            };
            match answer {
                ModalAnswer::Accept => decisions.push(Decision::Accept),
                ModalAnswer::Reject => decisions.push(Decision::Reject),
                ModalAnswer::AcceptAll => {
                    decisions.push(Decision::Accept);
                    blanket = Some(Decision::Accept);
                }
                ModalAnswer::RejectAll => {
                    decisions.push(Decision::Reject);
                    blanket = Some(Decision::Reject);
                }
                ModalAnswer::Quit => {
                    debug!("user aborted the confirmation batch");
                    while decisions.len() < items.len() {
                        decisions.push(Decision::Reject);
                    }
                    return BatchDecision {
                        decisions,
                        aborted: true,
                    };
                }
            }
        }
        BatchDecision {
            decisions,
            aborted: false,
        }
    }
}

/// One process-wide stdin reader; prompts take lines off the channel with a
/// timeout instead of blocking on the handle directly.
fn stdin_lines() -> &'static Mutex<Receiver<String>> {
    static LINES: OnceCell<Mutex<Receiver<String>>> = OnceCell::new();
    LINES.get_or_init(|| {
        let (sender, receiver) = mpsc::channel();
        std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                use std::io::BufRead;
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            })
            .ok();
        Mutex::new(receiver)
    })
}

/// Scripted prompter used by gate and restore tests.
#[cfg(test)]
pub struct ScriptedPrompter {
    pub answers: std::collections::VecDeque<Decision>,
    pub abort_after: Option<usize>,
    pub seen: Vec<PromptItem>,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn accepting() -> Self {
        Self {
            answers: std::collections::VecDeque::new(),
            abort_after: None,
            seen: Vec::new(),
        }
    }

    pub fn with_answers(answers: Vec<Decision>) -> Self {
        Self {
            answers: answers.into(),
            abort_after: None,
            seen: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Prompter for ScriptedPrompter {
    fn confirm_batch(&mut self, _verb: &str, items: &[PromptItem]) -> BatchDecision {
        self.seen.extend(items.iter().cloned());
        let mut decisions = Vec::with_capacity(items.len());
        for (index, _) in items.iter().enumerate() {
            if let Some(limit) = self.abort_after {
                if index >= limit {
                    while decisions.len() < items.len() {
                        decisions.push(Decision::Reject);
                    }
                    return BatchDecision {
                        decisions,
                        aborted: true,
                    };
                }
            }
            decisions.push(self.answers.pop_front().unwrap_or(Decision::Accept));
        }
        BatchDecision {
            decisions,
            aborted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_no_rejects_without_reading_anything() {
        let mut prompter = ConsolePrompter::new(
            PromptPolicy::AlwaysNo,
            Duration::from_secs(15),
            Duration::from_secs(30),
        );
        let items = vec![
            PromptItem {
                label: "/tmp/a".to_string(),
                strength: ConfirmStrength::Normal,
                detail: None,
            };
            3
        ];
        let decision = prompter.confirm_batch("delete", &items);
        assert!(!decision.aborted);
        assert_eq!(decision.decisions, vec![Decision::Reject; 3]);
    }

    #[test]
    fn always_yes_accepts_normal_batches_outright() {
        let mut prompter = ConsolePrompter::new(
            PromptPolicy::AlwaysYes,
            Duration::from_secs(15),
            Duration::from_secs(30),
        );
        let items = vec![
            PromptItem {
                label: "/tmp/a".to_string(),
                strength: ConfirmStrength::Normal,
                detail: None,
            };
            2
        ];
        let decision = prompter.confirm_batch("delete", &items);
        assert_eq!(decision.decisions, vec![Decision::Accept; 2]);
    }

    #[test]
    fn scripted_prompter_replays_answers_in_order() {
        let mut prompter =
            ScriptedPrompter::with_answers(vec![Decision::Accept, Decision::Reject]);
        let items = vec![
            PromptItem {
                label: "/tmp/a".to_string(),
                strength: ConfirmStrength::Normal,
                detail: None,
            };
            2
        ];
        let decision = prompter.confirm_batch("delete", &items);
        assert_eq!(
            decision.decisions,
            vec![Decision::Accept, Decision::Reject]
        );
    }
}
