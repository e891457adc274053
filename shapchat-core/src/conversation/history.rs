//! Token-bounded message history
//!
//! The store keeps the ordered messages of one conversation and enforces a hard token
//! ceiling after each completed exchange. The first `critical_head_size` messages (the
//! system prompt and the opening exchange) and the last `critical_tail_size` messages
//! (the newest exchange) are never removed; messages in between are evicted oldest
//! first until the history fits.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShapchatError};
use crate::llm::PromptMessage;
use crate::tokenizer::SharedTokenCounter;

use super::message::Message;

/// Budget settings for a [`HistoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum total token cost of the retained history
    pub budget: usize,
    /// Leading messages that are never evicted
    pub critical_head_size: usize,
    /// Trailing messages that are never evicted
    pub critical_tail_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            budget: 3000,
            critical_head_size: 3,
            critical_tail_size: 2,
        }
    }
}

/// Outcome of a budget enforcement pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    /// Messages evicted from the middle of the history
    pub removed: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

impl TrimReport {
    fn unchanged(tokens: usize) -> Self {
        Self {
            removed: 0,
            tokens_before: tokens,
            tokens_after: tokens,
        }
    }

    pub fn trimmed(&self) -> bool {
        self.removed > 0
    }
}

/// Ordered conversation history with budget enforcement.
///
/// Invariants:
/// - at most one system message, and if present it is at index 0
/// - after [`enforce_budget`](Self::enforce_budget) returns `Ok`, the total token cost
///   is within the budget; after it returns `Err`, nothing changed
pub struct HistoryStore {
    messages: Vec<Message>,
    config: HistoryConfig,
    counter: SharedTokenCounter,
}

impl HistoryStore {
    pub fn new(config: HistoryConfig, counter: SharedTokenCounter) -> Self {
        Self {
            messages: Vec::new(),
            config,
            counter,
        }
    }

    /// Add a message. The first system message goes to the front; a second one is
    /// rejected. No budget check happens here.
    pub fn append(&mut self, message: Message) -> Result<()> {
        if message.is_system() {
            if self.has_system_message() {
                return Err(ShapchatError::InvalidMessage(
                    "history already has a system message".to_string(),
                ));
            }
            self.messages.insert(0, message);
        } else {
            self.messages.push(message);
        }
        Ok(())
    }

    /// Enforce the configured budget
    pub fn enforce_budget(&mut self) -> Result<TrimReport> {
        self.enforce_budget_with(self.config.budget)
    }

    /// Evict middle messages, oldest first, until the total fits `budget`.
    ///
    /// Fails with [`ShapchatError::BudgetExceeded`] when the critical head and tail
    /// alone exceed the budget; the history is left untouched in that case.
    pub fn enforce_budget_with(&mut self, budget: usize) -> Result<TrimReport> {
        let len = self.messages.len();
        let head = self.config.critical_head_size;

        if len < head + 1 {
            return Ok(TrimReport::unchanged(self.total_tokens()));
        }

        let tail_start = len.saturating_sub(self.config.critical_tail_size).max(head);
        let costs: Vec<usize> = self
            .messages
            .iter()
            .map(|m| m.token_cost(self.counter.as_ref()).tokens)
            .collect();

        let total: usize = costs.iter().sum();
        if total <= budget {
            return Ok(TrimReport::unchanged(total));
        }

        let critical: usize =
            costs[..head].iter().sum::<usize>() + costs[tail_start..].iter().sum::<usize>();
        if critical > budget {
            tracing::debug!(critical, budget, "Critical context does not fit the budget");
            return Err(ShapchatError::BudgetExceeded { critical, budget });
        }

        let mut remaining = total;
        let mut evict = 0;
        for cost in &costs[head..tail_start] {
            if remaining <= budget {
                break;
            }
            remaining -= cost;
            evict += 1;
        }

        self.messages.drain(head..head + evict);

        tracing::debug!(
            removed = evict,
            tokens_before = total,
            tokens_after = remaining,
            budget,
            "Trimmed conversation history"
        );

        Ok(TrimReport {
            removed: evict,
            tokens_before: total,
            tokens_after: remaining,
        })
    }

    pub fn budget(&self) -> usize {
        self.config.budget
    }

    /// Change the budget. Takes effect on the next enforcement pass.
    pub fn set_budget(&mut self, budget: usize) {
        self.config.budget = budget;
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Sum of the per-message token costs
    pub fn total_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.token_cost(self.counter.as_ref()).tokens)
            .sum()
    }

    /// Number of messages whose cost is a fallback estimate
    pub fn estimated_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.token_cost(self.counter.as_ref()).estimated)
            .count()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_system_message(&self) -> bool {
        self.messages.first().is_some_and(Message::is_system)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Messages in wire form, for a backend request
    pub fn snapshot(&self) -> Vec<PromptMessage> {
        self.messages.iter().map(Message::to_prompt).collect()
    }

    /// Drop everything except the system message
    pub fn discard_conversation(&mut self) -> usize {
        let keep = usize::from(self.has_system_message());
        let removed = self.messages.len() - keep;
        self.messages.truncate(keep);
        removed
    }

    /// Remove a trailing user message whose exchange never completed
    pub fn retract_pending_user(&mut self) -> Option<Message> {
        match self.messages.last() {
            Some(m) if m.role() == crate::llm::MessageRole::User => self.messages.pop(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("messages", &self.messages.len())
            .field("config", &self.config)
            .field("model", &self.counter.model())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use crate::tokenizer::{FailingTokenCounter, TokenCounter};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Counter with a fixed cost per text
    struct TableCounter(HashMap<String, usize>);

    impl TokenCounter for TableCounter {
        fn model(&self) -> &str {
            "table"
        }

        fn count(&self, text: &str) -> Result<usize> {
            self.0
                .get(text)
                .copied()
                .ok_or_else(|| ShapchatError::TokenizationFailure {
                    model: "table".to_string(),
                    reason: format!("no cost for '{}'", text),
                })
        }
    }

    const SCENARIO: [(MessageRole, &str, usize); 8] = [
        (MessageRole::System, "system", 50),
        (MessageRole::User, "user_1", 100),
        (MessageRole::Assistant, "assistant_1", 80),
        (MessageRole::User, "mid_1", 40),
        (MessageRole::Assistant, "mid_2", 60),
        (MessageRole::User, "mid_3", 50),
        (MessageRole::User, "user_last", 70),
        (MessageRole::Assistant, "assistant_last", 90),
    ];

    fn scenario_store(budget: usize) -> HistoryStore {
        let counter = TableCounter(
            SCENARIO
                .iter()
                .map(|(_, text, cost)| (text.to_string(), *cost))
                .collect(),
        );
        let config = HistoryConfig {
            budget,
            ..HistoryConfig::default()
        };
        let mut store = HistoryStore::new(config, Arc::new(counter));
        for (role, text, _) in SCENARIO {
            store.append(Message::new(role, text)).unwrap();
        }
        store
    }

    fn contents(store: &HistoryStore) -> Vec<&str> {
        store.messages().iter().map(Message::content).collect()
    }

    #[test]
    fn test_trims_middle_oldest_first() {
        let mut store = scenario_store(400);
        assert_eq!(store.total_tokens(), 540);

        let report = store.enforce_budget().unwrap();

        assert_eq!(
            contents(&store),
            vec!["system", "user_1", "assistant_1", "user_last", "assistant_last"]
        );
        assert_eq!(store.total_tokens(), 390);
        assert_eq!(
            report,
            TrimReport {
                removed: 3,
                tokens_before: 540,
                tokens_after: 390,
            }
        );
    }

    #[test]
    fn test_stops_as_soon_as_budget_fits() {
        let mut store = scenario_store(450);
        let report = store.enforce_budget().unwrap();

        // Removing mid_1 and mid_2 reaches 440
        assert_eq!(report.removed, 2);
        assert_eq!(store.total_tokens(), 440);
        assert_eq!(contents(&store)[3], "mid_3");
    }

    #[test]
    fn test_critical_overflow_leaves_history_unchanged() {
        let mut store = scenario_store(300);
        let before: Vec<String> = contents(&store).iter().map(|s| s.to_string()).collect();

        let err = store.enforce_budget().unwrap_err();

        assert!(matches!(
            err,
            ShapchatError::BudgetExceeded {
                critical: 390,
                budget: 300
            }
        ));
        assert_eq!(contents(&store), before);
        assert_eq!(store.total_tokens(), 540);
    }

    #[test]
    fn test_enforcement_is_idempotent() {
        let mut store = scenario_store(400);
        store.enforce_budget().unwrap();
        let once: Vec<String> = contents(&store).iter().map(|s| s.to_string()).collect();

        let report = store.enforce_budget().unwrap();

        assert!(!report.trimmed());
        assert_eq!(contents(&store), once);
    }

    #[test]
    fn test_short_history_is_noop() {
        let mut store = HistoryStore::new(
            HistoryConfig {
                budget: 1,
                ..HistoryConfig::default()
            },
            Arc::new(crate::tokenizer::HeuristicTokenCounter::new("m")),
        );
        store.append(Message::system("a long system prompt")).unwrap();
        store.append(Message::user("hello there")).unwrap();
        store.append(Message::assistant("general kenobi")).unwrap();

        let report = store.enforce_budget().unwrap();

        assert_eq!(report.removed, 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_tail_never_overlaps_head() {
        let counter = TableCounter(
            [("s", 10), ("u", 10), ("a", 10), ("x", 10)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        let mut store = HistoryStore::new(
            HistoryConfig {
                budget: 35,
                critical_head_size: 3,
                critical_tail_size: 2,
            },
            Arc::new(counter),
        );
        for m in [
            Message::system("s"),
            Message::user("u"),
            Message::assistant("a"),
            Message::user("x"),
        ] {
            store.append(m).unwrap();
        }

        // Head covers 3 messages and the tail only the fourth: nothing is evictable
        let err = store.enforce_budget().unwrap_err();
        assert!(matches!(
            err,
            ShapchatError::BudgetExceeded {
                critical: 40,
                budget: 35
            }
        ));
    }

    #[test]
    fn test_system_message_goes_first_and_is_unique() {
        let mut store = scenario_store(1000);
        let err = store.append(Message::system("another")).unwrap_err();
        assert!(matches!(err, ShapchatError::InvalidMessage(_)));

        let mut store = HistoryStore::new(
            HistoryConfig::default(),
            Arc::new(crate::tokenizer::HeuristicTokenCounter::new("m")),
        );
        store.append(Message::user("hi")).unwrap();
        store.append(Message::system("be nice")).unwrap();
        assert!(store.has_system_message());
        assert_eq!(store.messages()[0].content(), "be nice");
        assert_eq!(store.snapshot()[1].role, MessageRole::User);
    }

    #[test]
    fn test_degraded_counting_keeps_store_usable() {
        let mut store = HistoryStore::new(
            HistoryConfig {
                budget: 42,
                critical_head_size: 1,
                critical_tail_size: 1,
            },
            Arc::new(FailingTokenCounter),
        );
        store.append(Message::system("0123456789")).unwrap();
        store.append(Message::user("0123456789")).unwrap();
        store.append(Message::assistant("0123456789")).unwrap();
        store.append(Message::user("0123456789")).unwrap();

        let report = store.enforce_budget().unwrap();

        // 10 bytes plus 4 overhead per message
        assert_eq!(report.tokens_before, 56);
        assert_eq!(report.tokens_after, 42);
        assert_eq!(store.estimated_count(), 3);
    }

    #[test]
    fn test_recovery_helpers() {
        let mut store = scenario_store(400);
        store.append(Message::user("pending")).unwrap();

        let retracted = store.retract_pending_user().unwrap();
        assert_eq!(retracted.content(), "pending");
        assert!(store.retract_pending_user().is_none());

        store.set_budget(600);
        assert_eq!(store.budget(), 600);
        assert!(!store.enforce_budget().unwrap().trimmed());

        assert_eq!(store.discard_conversation(), 7);
        assert_eq!(contents(&store), vec!["system"]);
    }
}
