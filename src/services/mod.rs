pub mod generator;
pub mod reply_table;
pub mod resolver;
