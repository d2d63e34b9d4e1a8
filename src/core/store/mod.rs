pub mod conversation;
pub mod lock;

pub use conversation::{ChatTurn, ConversationStore, Role};
pub use lock::{LockError, LockManager};
