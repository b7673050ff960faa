pub mod atomic_map;
pub mod buf;
pub mod timer;
