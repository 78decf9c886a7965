pub mod actor;
pub mod delivery;
pub mod request;
pub mod stop;
pub mod tracking;
pub mod view;
