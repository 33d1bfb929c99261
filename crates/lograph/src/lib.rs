// Domain-driven module structure for lograph.

// Core data model
pub mod series;
pub mod parser;

// Driver
pub mod conf;
pub mod runtime;
