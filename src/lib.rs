#![forbid(unsafe_code)]

//! Jellyfin-compatible front for the Anilibria catalog.
//!
//! The library holds everything the server binary needs: identifier codec,
//! upstream client and cache, Jellyfin DTO shaping, HLS rewriting, the stream
//! proxy, and the favorites store.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod content_id;
pub mod favorites;
pub mod identity;
pub mod playlist;
pub mod proxy;
pub mod upstream;
