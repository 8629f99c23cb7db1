//! # Responder
//!
//! The keyword auto-responder proper:
//!
//! - [`commands`] decodes inbound text and turns it into an [`commands::Action`]
//!   (pure, no I/O)
//! - [`supervisor`] opens radio sessions and retries with a fixed backoff
//! - [`server`] runs the dispatch loop that ties both to a live transport
//!
//! ```rust,no_run
//! use meshping::config::Config;
//! use meshping::responder::ResponderServer;
//! use meshping::transport::mock::MockRadio;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let radio = MockRadio::new();
//! let server = ResponderServer::new(&Config::default(), radio.connector(), stop_rx);
//! let summary = server.run().await?;
//! println!("answered {} commands", summary.replies_sent);
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod server;
pub mod supervisor;

pub use commands::{interpret, Action, Command, InboundMessage, OutboundReply, ReplyPolicy};
pub use server::{ResponderServer, RunSummary};
pub use supervisor::{ConnectionSupervisor, LinkState};
