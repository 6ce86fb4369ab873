mod idempotency;
mod payment;
mod refund;
mod webhook;

pub use idempotency::*;
pub use payment::*;
pub use refund::*;
pub use webhook::*;
