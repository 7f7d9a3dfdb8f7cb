/// Daily screen-time budgets per OS account
///
/// This module provides functionality to:
/// - Load each user's daily allotment from configuration
/// - Count down while a user's session is active
/// - Lock or log off the session once the budget is spent
/// - Reset budgets on the first logon or unlock of a new day

pub mod config;
pub mod engine;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod watcher;

pub use engine::SessionBudgetEngine;
pub use platform::NativeSessions;
pub use scheduler::CountdownScheduler;
pub use store::UserBudgetStore;
pub use watcher::SessionWatcher;
