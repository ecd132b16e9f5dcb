// Reconciliation
pub mod reconcile;

// Auxiliary operations
pub mod check_auth;
pub mod outpost_config;
pub mod outposts;
pub mod redirects;
pub mod tokens;
