//! Domain layer - Core recovery model
//!
//! This module contains the entities, repository traits and domain
//! services shared by every recovery mode. Nothing here touches a real
//! device or the file system directly.

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod services;
