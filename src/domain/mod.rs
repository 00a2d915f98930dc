// Assets, intervals and series
pub mod assets;

// Domain-specific error types
pub mod errors;

// Progress and price notifications
pub mod events;

// Port interfaces
pub mod ports;
