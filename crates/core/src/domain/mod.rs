pub mod event;
pub mod lead;
pub mod page;
