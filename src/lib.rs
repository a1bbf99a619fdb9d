pub mod browser;
pub mod collector;
pub mod config;
pub mod issue;
pub mod probe;
pub mod probes;
pub mod report;
pub mod runner;
pub mod session;
