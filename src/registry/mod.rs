//! Channel registry for publish/subscribe routing
//!
//! The registry maps channel names to the current publish session and
//! enforces a single publisher per name.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ChannelRegistry>
//!                  ┌──────────────────────────┐
//!                  │ channels: HashMap<name,  │
//!                  │   Arc<Channel {          │
//!                  │     queue: Arc<Queue>,   │
//!                  │   }>                     │
//!                  │ >                        │
//!                  └────────────┬─────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!   [Publisher]           [Subscriber]           [Subscriber]
//!   register()            lookup()               lookup()
//!   queue.write_packet()  queue.latest()         queue.latest()
//!   queue.close()         cursor.read()          cursor.read()
//!   unregister()
//! ```
//!
//! # Versioned channels
//!
//! Each publish session gets a fresh `Arc<Channel>`. Entries are swapped
//! wholesale, never edited, and `unregister` compares by pointer so a late
//! cleanup from an old publisher cannot evict a newer one.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{Channel, ChannelStats};
pub use error::RegistryError;
pub use store::{normalize_name, ChannelRegistry};
