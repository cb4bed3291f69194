pub mod command;
pub mod event_loop;
