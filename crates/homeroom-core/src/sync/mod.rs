//! Cross-context synchronization.
//!
//! Every open context of a learner holds a replica of one session record. The
//! local fan-out channel carries leader heartbeats between contexts; the
//! durable store and its change feed carry the record itself across devices.

pub mod channel;
pub mod ids;
pub mod leadership;
pub mod replica;
pub mod store;

pub use channel::{ChannelMessage, FanoutBus, Subscription};
pub use ids::{ContextId, IdError, LearnerId};
pub use leadership::{LeadershipChange, LeadershipClaim, LeadershipCoordinator, PromotionReason, Role};
pub use replica::{PushOutcome, ReconcileOutcome, ReplicaSynchronizer, StalenessGuard};
pub use store::{ChangeFeed, MemoryStore, SessionRecord, SessionStore, SharedStore, SqliteStore};
