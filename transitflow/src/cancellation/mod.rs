//! Cooperative shutdown for the pipeline loops.

mod token;

pub use token::CancellationToken;
