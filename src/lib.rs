//! notebus - client for Misskey-style HTTP and streaming APIs
//!
//! Covers the three things an app needs against a Misskey-compatible
//! instance: the MiAuth authorization flow, authenticated JSON API calls,
//! and a single WebSocket multiplexed into independent logical channels
//! (timelines, per-note subscriptions, the `main` notification stream).
//!
//! # Example
//!
//! ```no_run
//! use notebus::{
//!     ChannelKind, ChannelMessage, HttpApi, NotebusConfig, Permission, PermissionKind,
//!     StreamMessage, StreamingApi,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = HttpApi::new(NotebusConfig::new("misskey.example"));
//!
//!     // Instance statistics work before authorization.
//!     let stats = api.stats().await?;
//!     println!("stats: {stats}");
//!
//!     // Ask the user for read access to their account.
//!     api.authorize(
//!         "Example app",
//!         None,
//!         None,
//!         &[Permission::Read(PermissionKind::Account)],
//!     )?;
//!     println!("open this in a browser: {}", api.auth_url().unwrap());
//!
//!     if !api.wait_check().await? {
//!         return Err("authorization denied".into());
//!     }
//!
//!     // One socket, one channel, pull messages in a loop.
//!     let streaming = StreamingApi::new(&api);
//!     streaming.connect_streaming().await?;
//!     let timeline = streaming.connect_channel(ChannelKind::GlobalTimeline).await?;
//!
//!     loop {
//!         if let StreamMessage::Channel { id, body } = streaming.receive().await? {
//!             if id == timeline.id() {
//!                 if let ChannelMessage::Note(note) = body {
//!                     println!("{:?}: {:?}", note.user, note.text);
//!                 }
//!             }
//!         }
//!     }
//! }
//! ```

mod channels;
mod config;
mod error;
mod http;
mod messages;
mod permissions;
mod streaming;

pub use channels::{ChannelConnection, ChannelKind};
pub use config::NotebusConfig;
pub use error::{NotebusError, Result};
pub use http::{AuthSession, Credential, HttpApi, WaitCheck};
pub use messages::{
    ChannelMessage, FrameKind, Note, Notification, OutboundMessage, StreamMessage, User,
};
pub use permissions::{Permission, PermissionKind, PermissionSet};
pub use streaming::{SessionState, StreamingApi};
