pub mod model;
pub mod reconciler;
pub mod validate;
