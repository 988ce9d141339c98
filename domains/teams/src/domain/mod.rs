//! Teams domain layer: entities and the membership state machine

pub mod entities;
pub mod state;
