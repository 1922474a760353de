//! Communication plumbing shared by setup and evaluation.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, ExchangeTags, LocalComm, NoComm, Wait};
pub use exchange::{all_gather_bytes, exchange_bytes, exchange_sized, exchange_sizes};
