//! Distributed unique ID generators inspired by [Twitter's Snowflake] and
//! [Sony's Sonyflake], with pluggable sequence coordination.
//!
//! A generator packs a timestamp, its node identity and a sequence number
//! into a 64-bit integer. The sequence number for each time bucket comes from
//! a [`SequenceResolver`], which may be process local, a lock file shared by
//! the processes of one machine, or a shared store such as Redis.
//!
//! ## Quickstart
//!
//! ```
//! use flakeid::{IdGenerator, Snowflake};
//!
//! let sf = Snowflake::new(1, 2).unwrap();
//! let id = sf.id().unwrap();
//! let parsed = sf.parse_id(&id, true).unwrap();
//! assert_eq!(parsed.datacenter_id, Some(1));
//! assert_eq!(parsed.worker_id, Some(2));
//! ```
//!
//! ## Concurrent use
//!
//! Generators are thread safe. `clone` one before moving it to another
//! thread; clones share the same sequence state:
//! ```
//! use flakeid::Sonyflake;
//! use std::thread;
//!
//! let sf = Sonyflake::new(42).unwrap();
//!
//! let mut children = Vec::new();
//! for _ in 0..10 {
//!     let thread_sf = sf.clone();
//!     children.push(thread::spawn(move || {
//!         println!("{}", thread_sf.next_id().unwrap());
//!     }));
//! }
//!
//! for child in children {
//!     child.join().unwrap();
//! }
//! ```
//!
//! ## Shared sequences
//!
//! ```
//! use flakeid::{MemoryStore, SharedStoreResolver, Snowflake};
//! use std::sync::Arc;
//!
//! let resolver = Arc::new(SharedStoreResolver::new(MemoryStore::new()));
//! let a = Snowflake::builder()
//!     .data_center_id(&|| Ok(1))
//!     .worker_id(&|| Ok(1))
//!     .sequence_resolver(resolver.clone())
//!     .finalize()
//!     .unwrap();
//! let b = Snowflake::builder()
//!     .data_center_id(&|| Ok(1))
//!     .worker_id(&|| Ok(1))
//!     .sequence_resolver(resolver)
//!     .finalize()
//!     .unwrap();
//! assert_ne!(a.next_id().unwrap(), b.next_id().unwrap());
//! ```
//!
//! [Twitter's Snowflake]: https://blog.twitter.com/2010/announcing-snowflake
//! [Sony's Sonyflake]: https://github.com/sony/sonyflake

mod builder;
mod clock;
mod config;
mod error;
mod factory;
mod generator;
pub mod global;
mod id;
mod resolver;
pub mod snowflake;
pub mod sonyflake;

pub use builder::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use factory::*;
pub use generator::{IdGenerator, ParsedId};
pub use id::*;
pub use resolver::*;
pub use snowflake::{DecomposedSnowflake, Snowflake};
pub use sonyflake::{DecomposedSonyflake, Sonyflake};
