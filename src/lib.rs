//! KeyBridge - Key event injection over the ADB wire protocol
//!
//! A minimal client for the ADB TCP transport: it performs the CONNECT
//! handshake, opens one `shell:` stream per command and tears it down again.
//! Typical use is sending a key event to a tablet on the local network:
//!
//! ```no_run
//! # async fn demo() {
//! use keybridge::{Client, ClientConfig, KeyCode};
//!
//! let client = Client::new(ClientConfig::default());
//! if client.connect("192.168.1.50", 5555).await {
//!     client.send_key_event(KeyCode::DPAD_UP).await;
//! }
//! client.disconnect().await;
//! # }
//! ```

pub mod config;
pub mod keys;
pub mod network;
pub mod protocol;

pub use keys::KeyCode;
pub use network::{Client, ClientConfig, ClientEvent, ClientState, Endpoint, Session};
