//! The built-in pipeline stages, in assembly order:
//!
//! ```text
//! application interceptors
//!         │
//!         ▼
//! ┌──────────────────┐  follow-ups, failure recovery, the per-call
//! │ RetryAndFollowUp │  resource claim
//! └──────────────────┘
//!         │
//!         ▼
//! ┌──────────────────┐  application request ⇆ network request,
//! │      Bridge      │  cookies, transparent gzip
//! └──────────────────┘
//!         │
//!         ▼
//! ┌──────────────────┐  stored-response reuse, conditional requests,
//! │    CacheStage    │  response storage
//! └──────────────────┘
//!         │
//!         ▼
//! ┌──────────────────┐  connection + codec acquisition
//! │   ConnectStage   │
//! └──────────────────┘
//!         │
//!         ▼
//! network interceptors (skipped for websocket calls)
//!         │
//!         ▼
//! ┌──────────────────┐  one wire exchange
//! │    CallServer    │
//! └──────────────────┘
//! ```

mod bridge;
mod cache;
mod call_server;
mod connect;
mod retry;

pub(crate) use bridge::Bridge;
pub(crate) use cache::CacheStage;
pub(crate) use call_server::CallServer;
pub(crate) use connect::ConnectStage;
pub(crate) use retry::RetryAndFollowUp;
