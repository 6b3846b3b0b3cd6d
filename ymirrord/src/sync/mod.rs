pub mod backoff;
pub mod diff;
pub mod engine;
pub mod mediatype;
pub mod remote;
pub mod scanner;
pub mod snapshot;
pub mod state;
pub mod transfer;
