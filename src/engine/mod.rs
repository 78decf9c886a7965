pub mod identity;
pub mod lifecycle;
pub mod pricing;
pub mod transitions;
