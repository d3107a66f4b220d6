// Client-side features: economy rules, local state and the sync machinery around it
pub mod economy;
pub mod local_store;
pub mod presence;
pub mod reconciler;
pub mod scheduler;
pub mod session;
pub mod social;
