//! webchat-bridge: streaming chat adapters for AI chat web apps.
//!
//! Talks to browser-session backends (the Gemini and Qwen web clients) and
//! to OpenAI-compatible / Ollama servers, and normalizes their wire formats
//! into one callback-based streaming contract.
//!
//! # Quick Start
//!
//! ```no_run
//! use webchat_bridge::prelude::*;
//!
//! struct Print;
//!
//! impl MessageCallbacks for Print {
//!     fn on_content(&mut self, text: &str) {
//!         print!("{text}");
//!     }
//!     fn on_done(&mut self) {
//!         println!();
//!     }
//!     fn on_error(&mut self, error: BridgeError) {
//!         eprintln!("{error}");
//!     }
//! }
//!
//! # async fn example() -> webchat_bridge::error::Result<()> {
//! let registry = AdapterRegistry::from_config(&BridgeConfig::from_env());
//! let adapter = registry.route("gemini-web-fast")?;
//! let options = HandleMessageOptions::builder()
//!     .credential(r#"{"cookies":{"__Secure-1PSID":"..."}}"#)
//!     .messages(vec![Message::user("Hello!")])
//!     .model("gemini-web-fast")
//!     .build();
//! adapter.handle_message(options, &mut Print).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod credential;
pub mod decode;
pub mod error;
pub mod models;
pub mod prelude;
pub mod provider;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
