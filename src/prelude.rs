//! Convenience re-exports for common use.

pub use crate::config::{BridgeConfig, ProviderProfile};
pub use crate::credential::Credential;
pub use crate::error::{BridgeError, Result};
pub use crate::models::{BuiltinCatalog, ModelCatalog, ProviderKey, TomlCatalog};
pub use crate::provider::{
    AdapterRegistry, ChatAdapter, HandleMessageOptions, MessageCallbacks,
};
pub use crate::types::{ConversationMetadata, Message, ModelDescriptor, Role, StreamEvent};
