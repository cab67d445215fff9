//! SQLite-backed conversation storage for Arcana.
//!
//! Conversations are titled threads of messages. Message content is stored
//! exactly as the client sent it (a string or a list of content blocks), so
//! a reloaded conversation can be replayed to the model unchanged.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use storage::{ConversationStore, Role};
//!
//! let store = ConversationStore::open("arcana.db")?;
//! let conversation = store.create("Trip planning")?;
//! store.append_message(conversation.id, Role::User, &json!("Find flights to Lisbon"))?;
//!
//! for summary in store.list()? {
//!     println!("{}: {}", summary.id, summary.title);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod conversation;
mod error;
mod store;

pub use conversation::{Conversation, ConversationDetail, ConversationId, Role, StoredMessage};
pub use error::{Error, Result};
pub use store::ConversationStore;
