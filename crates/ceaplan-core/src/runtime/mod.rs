//! Handler runtime: the contract every bus participant implements and the
//! receive loop that drives it.

mod handler;
mod worker;

pub use self::handler::{Handler, HandlerContext};
pub use self::worker::{HandlerHandle, HandlerRunner};
