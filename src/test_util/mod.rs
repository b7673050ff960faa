pub mod listener;
pub mod packet;
pub mod send_socket;
