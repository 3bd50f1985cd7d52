#![warn(clippy::nursery, clippy::pedantic)]

//! Ephemeral paste storage: slug allocation, expiry and burn-after-read on top
//! of interchangeable storage backends.

pub mod config;
pub mod delivery;
pub mod error;
pub mod integrity;
pub mod lifecycle;
pub mod paste;
pub mod routes;
pub mod slug;
pub mod storage;

pub use crate::delivery::{Delivery, Preview};
pub use crate::error::{Error, Result};
pub use crate::lifecycle::{EngineConfig, PasteManager};
pub use crate::paste::PastePolicy;
