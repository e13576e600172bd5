// Request authentication and credential refresh
pub mod auth;
pub mod session;

// Delegated credential storage
pub mod credentials;

// Identity provider token refresh
pub mod oauth;

// Mailbox API client
pub mod gmail;

// Folder and label reconciliation
pub mod folders;

// Two-step confirmation for destructive operations
pub mod confirmation;

// HTTP tool API
pub mod api;

pub mod config;
