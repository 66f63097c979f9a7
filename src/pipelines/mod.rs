pub mod align;
pub mod classify;
pub mod envtest;
pub mod qcheck;
pub mod stages;
