//! Traffic Priority Library
//!
//! Signal controllers and vehicle agents sharing one world model and
//! negotiating right-of-way over request/response messages.

pub mod simulation;
