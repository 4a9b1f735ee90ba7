pub mod actions;
pub mod classify;
pub mod conditions;
pub mod cooldown;
pub mod reconcile;
pub mod validate;

pub use reconcile::run;
