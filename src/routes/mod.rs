// # Routes Module
//
// - HTTP route handlers for the keeper's health server.
// - The surface is read-only; nothing here can reach the treasury.

/// Health check and keeper status endpoints
pub mod health;
