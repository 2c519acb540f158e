pub mod envelope;

pub use envelope::{ChainEvent, CreatePayload, EventKind, RawTxPayload, TransferPayload};
