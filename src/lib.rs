pub mod bencher;
pub mod config;
pub mod error;
pub mod lock;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod store;

pub use bencher::{Bencher, JobRequest};
pub use error::{BencherError, Result};
