pub mod factory;
pub mod worker;

pub use factory::{AppFactory, AppPaths};
pub use worker::{Recall, SearchTicket, SearchWorker};
