pub mod comment;
pub mod rename;
pub mod resume;
pub mod user;
