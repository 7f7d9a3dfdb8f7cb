use chrono::{DateTime, Local, NaiveDate};
use std::collections::BTreeMap;

/// Daily budget for a single managed user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBudget {
    /// Calendar day the budget was last reset for
    pub day: NaiveDate,
    pub remaining_minutes: u32,
    /// Configured daily allotment, never changes after load
    pub default_minutes: u32,
    /// When the user's session last started counting (None while suspended)
    pub last_resume_at: Option<DateTime<Local>>,
}

impl TimeBudget {
    pub fn new(default_minutes: u32, today: NaiveDate) -> Self {
        Self {
            day: today,
            remaining_minutes: default_minutes,
            default_minutes,
            last_resume_at: None,
        }
    }
}

/// In-memory table of budgets keyed by username.
///
/// The set of usernames is fixed at construction. The store does no locking
/// of its own; callers serialize access.
#[derive(Debug, Clone, Default)]
pub struct UserBudgetStore {
    budgets: BTreeMap<String, TimeBudget>,
}

impl UserBudgetStore {
    /// Build the store from a `username -> daily minutes` table
    pub fn from_allotments<I>(allotments: I, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let budgets = allotments
            .into_iter()
            .map(|(user, minutes)| (user, TimeBudget::new(minutes, today)))
            .collect();

        Self { budgets }
    }

    /// Budget for a user, or None if the user is not managed
    pub fn get(&self, username: &str) -> Option<&TimeBudget> {
        self.budgets.get(username)
    }

    pub fn is_managed(&self, username: &str) -> bool {
        self.budgets.contains_key(username)
    }

    /// Reset the budget to the full allotment if `today` is a new day.
    ///
    /// Returns true when a reset happened.
    pub fn reset_if_new_day(&mut self, username: &str, today: NaiveDate) -> bool {
        match self.budgets.get_mut(username) {
            Some(budget) if budget.day != today => {
                budget.day = today;
                budget.remaining_minutes = budget.default_minutes;
                true
            }
            _ => false,
        }
    }

    /// Subtract minutes from the remaining budget, clamped at zero
    pub fn consume(&mut self, username: &str, minutes: u32) {
        if let Some(budget) = self.budgets.get_mut(username) {
            budget.remaining_minutes = budget
                .remaining_minutes
                .saturating_sub(minutes)
                .min(budget.default_minutes);
        }
    }

    /// True when the user has no minutes left (unmanaged users are never exhausted)
    pub fn is_exhausted(&self, username: &str) -> bool {
        self.budgets
            .get(username)
            .is_some_and(|b| b.remaining_minutes == 0)
    }

    /// Zero the remaining budget. Idempotent.
    pub fn exhaust(&mut self, username: &str) {
        if let Some(budget) = self.budgets.get_mut(username) {
            budget.remaining_minutes = 0;
        }
    }

    pub fn set_last_resume(&mut self, username: &str, at: Option<DateTime<Local>>) {
        if let Some(budget) = self.budgets.get_mut(username) {
            budget.last_resume_at = at;
        }
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.budgets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.budgets.len()
    }

    /// Owned copy of every budget, for status reporting
    pub fn snapshot(&self) -> Vec<(String, TimeBudget)> {
        self.budgets
            .iter()
            .map(|(user, budget)| (user.clone(), budget.clone()))
            .collect()
    }
}
