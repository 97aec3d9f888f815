//! Conversation FSM.
//!
//! Tracks, per Telegram chat, what kind of free-text reply is expected next.
//! Plain `/commands` and callback buttons are handled without consulting the
//! FSM; it exists for the handful of places where the bot needs to interpret
//! a user's next message in context (onboarding, plan intake, a skip
//! comment, a settings field edit).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    OnboardingTimezone,
    OnboardingMorningTime,
    OnboardingEveningTime,
    AwaitingPlan { plan_date: NaiveDate },
    AwaitingTaskComment { task_id: i64 },
    AwaitingSettingsField { field: SettingsField },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    Timezone,
    MorningTime,
    EveningTime,
    ReminderIntervalMinutes,
    ReminderMaxAttempts,
}

/// Storage seam for conversation state. The in-process implementation below
/// is correct for a single daemon instance; a shared-cache-backed
/// implementation could replace it without touching callers.
pub trait FsmStore: Send + Sync {
    fn get(&self, chat_id: i64) -> ConversationState;
    fn set(&self, chat_id: i64, state: ConversationState);
    fn clear(&self, chat_id: i64) {
        self.set(chat_id, ConversationState::Idle);
    }
}

#[derive(Default)]
pub struct InMemoryFsmStore {
    states: Mutex<HashMap<i64, ConversationState>>,
}

impl FsmStore for InMemoryFsmStore {
    fn get(&self, chat_id: i64) -> ConversationState {
        self.states
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .unwrap_or(ConversationState::Idle)
    }

    fn set(&self, chat_id: i64, state: ConversationState) {
        self.states.lock().unwrap().insert(chat_id, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_chat_defaults_to_idle() {
        let store = InMemoryFsmStore::default();
        assert_eq!(store.get(1), ConversationState::Idle);
    }

    #[test]
    fn set_then_clear_round_trips() {
        let store = InMemoryFsmStore::default();
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        store.set(1, ConversationState::AwaitingPlan { plan_date: date });
        assert_eq!(store.get(1), ConversationState::AwaitingPlan { plan_date: date });
        store.clear(1);
        assert_eq!(store.get(1), ConversationState::Idle);
    }
}
