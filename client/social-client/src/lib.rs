//! Community client
//!
//! Talks to the community REST API and keeps every fetched view in an
//! optimistic cache. Mutations (likes, saves, comments, friendships,
//! profile and post edits) update every cached copy of the affected data
//! before the server answers and roll all of them back together when it
//! refuses.
//!
//! ```no_run
//! use social_client::{ClientConfig, SocialClient};
//! use social_client::models::PostId;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let client = SocialClient::from_config(&ClientConfig::from_env()?)?;
//! client.refresh_feed().await?;
//! let liked = client.toggle_like(PostId(42)).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod mutations;
pub mod notify;
pub mod projector;
pub mod queries;
pub mod registration;
pub mod renderer;
pub mod session;
pub mod transport;

pub use cache::{PageCursor, QueryData, Store};
pub use client::{Confirmed, SocialClient};
pub use config::{ClientConfig, LogFormat, MetricsConfig};
pub use error::{ClientError, ClientResult};
pub use keys::QueryKey;
pub use notify::{NoticeLevel, Notification, Notifier};
pub use queries::PageLoad;
pub use registration::{FlowOutcome, RegistrationStep};
pub use renderer::{ModalGuard, ModalLock, QuerySubscription};
pub use session::{Session, SessionHandle};
pub use transport::{ApiFailure, ApiResponse, HttpTransport, Operation, Transport};
