//! Vul-Driller Library
//!
//! Mines the commit history of a git repository for vulnerability
//! identifiers (CVE, BID, OSVDB, VU#, ICSA, UVI, MS, ZDI, ZSL, CNVD, CNNVD,
//! GPZ) and keeps an earliest-sighting dataset that is updated incrementally.

pub mod config;
pub mod crawl;
pub mod drill;
pub mod error;
pub mod extraction;
pub mod git_mining;
pub mod merge;
pub mod metasploit;
pub mod registry;

pub use config::DrillConfig;
pub use drill::{Driller, DrillOptions, RunReport};
pub use error::DrillError;
pub use registry::{FamilyTag, IdentifierRegistry};
