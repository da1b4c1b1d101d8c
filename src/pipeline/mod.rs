//! The three pipeline stages and the consumer that drives them.
//!
//! Each stage registers its handlers on a [`Router`](crate::event::Router);
//! a [`Consumer`] feeds one subscription's deliveries through that router and
//! settles them.

pub mod consumer;
pub mod email_worker;
pub mod producer;
pub mod push_delivery;


pub use consumer::{Consumer, ConsumerConfig, ConsumerError, Disposition};
pub use email_worker::{EmailSender, EmailWorker, LogEmailSender, OutgoingEmail, SendError};
pub use producer::{
    BatchFanOut, EventProducer, FeatureFetcher, ProducerError, RefreshOutcome, SavedSearch,
    SearchCatalog,
};
pub use push_delivery::{
    InMemorySubscriptionFinder, PushDelivery, SubscriberTarget, SubscriptionFinder,
};
