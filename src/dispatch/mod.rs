// Decision dispatch: typed actions, output repair, credential pooling and
// the outbound request pipeline.

pub mod action;
pub mod dispatcher;
pub mod key_pool;
pub mod prompt;
pub mod repair;
pub mod transport;

pub use action::{Action, DecisionResponse, Tier};
pub use dispatcher::{DecisionDispatcher, DispatcherConfig, PremiumProvider, ProviderConfig};
pub use key_pool::KeyPool;
