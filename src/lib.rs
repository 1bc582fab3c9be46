// fryler - personal assistant daemon built on the claude CLI
// Library exports

// Core modules
pub mod claude;
pub mod directives;
pub mod heartbeat;
pub mod identity;
pub mod markers;
pub mod outbox;
pub mod store;

// Surfaces
pub mod cli;
pub mod conversation;
pub mod daemon;

// Ambient
pub mod config;
pub mod logging;
pub mod monitoring;
