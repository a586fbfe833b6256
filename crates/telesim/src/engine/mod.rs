pub mod fanout;
pub mod session;
