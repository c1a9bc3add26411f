//! Command Layer
//!
//! Receives decoded argument lists from a connection, executes them against
//! the shared [`Store`](crate::storage::Store), and returns the reply to send.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌───────────────────┐
//! │   RESP Parser     │  (protocol module)
//! └─────────┬─────────┘
//!           │ Vec<Bytes>
//!           ▼
//! ┌───────────────────┐
//! │ CommandDispatcher │  (this module)
//! │  - Dispatch       │
//! │  - Validate       │
//! │  - Execute        │
//! └─────────┬─────────┘
//!           │
//!           ▼
//! ┌───────────────────┐
//! │      Store        │  (storage module)
//! └───────────────────┘
//! ```

pub mod dispatcher;
pub mod error;

pub use dispatcher::CommandDispatcher;
pub use error::CommandError;
