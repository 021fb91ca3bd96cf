pub mod acl;
pub mod comments;
pub mod handlers;
pub mod service;
