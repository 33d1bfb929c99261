//! Runtime module — driver lifecycle: boot, load sources, report.

pub mod boot;
pub mod run;
pub mod report;
