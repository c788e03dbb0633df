// API key validation and at-rest encryption
pub mod credentials;

// Persistent key/value Secret Store
pub mod storage;

// In-memory session key and credential resolution
pub mod session;

// Lock/unlock flows run from UI contexts
pub mod lock;

// Message protocol, background service and messengers
pub mod api;

// Bearer-token check for the background service
pub mod auth;

// Remote alias service client
pub mod remote;

// TOML + env configuration
pub mod config;
