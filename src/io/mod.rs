pub mod bio;
pub mod buf;
