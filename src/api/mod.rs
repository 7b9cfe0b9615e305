//! REST API module
//!
//! HTTP access to the protocol. Mutating calls carry a [`handlers::CallerAuth`]
//! signed over `cryptoguard:{operation}:{target}:{issued_at}:{params}`, where
//! `params` is the digest of the call's arguments. A signed call is accepted
//! once.
//!
//! # Endpoints
//!
//! ## Accounts
//! - `GET /api/accounts` - List protected accounts
//! - `POST /api/accounts` - Create the caller's account
//! - `GET /api/accounts/{address}` - Get an account
//! - `POST /api/accounts/{address}/guardians` - Add a guardian
//! - `PUT /api/accounts/{address}/threshold` - Change the threshold
//! - `GET /api/accounts/{address}/guardians/{candidate}` - Membership query
//! - `GET /api/guardians/{address}/accounts` - Accounts an address guards
//!
//! ## Monitor
//! - `PUT /api/patterns` - Set the caller's pattern
//! - `GET /api/patterns/{address}` - Get a pattern
//! - `POST /api/transfers/check` - Run the anomaly gate
//!
//! ## Recovery
//! - `POST /api/recovery/{address}/initiate|approve|expire`
//! - `GET /api/recovery/{address}` - Request snapshot
//!
//! ## Events
//! - `GET /api/events?since=N&account=A` - Ledger records
//! - `GET /ws` - Live ledger records

pub mod handlers;
pub mod routes;
pub mod websocket;

pub use handlers::{ApiState, CallerAuth, SignedCall};
pub use routes::{create_router, serve};
pub use websocket::WsBroadcaster;
