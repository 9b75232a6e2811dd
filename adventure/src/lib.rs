//! # Adventure
//!
//! A multiplayer text adventure whose players, rooms and monsters live as
//! virtual actors spread over a cluster of nodes.
//!
//! The interesting part is the runtime underneath the game: identity-based
//! addressing, one writer per actor, durable state with optimistic
//! concurrency, and membership-driven failover.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  game          Player / Room / Monster actors, policies     │
//! │  front_door    PlayerService (create / get player)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  actors        ActorHost, ActorRouter, AdventureNode        │
//! │                directory, placement, membership, state      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  address / codec / time / config                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution model
//!
//! Everything is single-threaded: each node runs inside a
//! [`tokio::task::LocalSet`], shared objects are `Rc`/`RefCell`, and every
//! activation is driven by its own local task.

#![deny(missing_docs)]

pub mod actors;
pub mod address;
pub mod codec;
pub mod config;
pub mod front_door;
pub mod game;
pub mod time;

pub use address::{AddressParseError, NetworkAddress};
pub use codec::{CodecError, JsonCodec};
pub use time::{TimeProvider, TokioTimeProvider};
