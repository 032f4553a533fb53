//! Session context
//!
//! - Platform detection and package-manager templates
//! - Conversation turns, execution attempts and learned fixes
//! - Local project context attached to queries about files

pub mod conversation;
pub mod local;
pub mod platform;

pub use conversation::{ConversationContext, ConversationTurn, LearningStore, Role, Session};
pub use local::{LocalContext, LocalContextCollector, QueryEvaluator, QueryScope, QueryType};
pub use platform::{PackageIntent, PlatformFamily, PlatformInfo};
