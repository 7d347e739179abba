pub mod news_db_operations;
pub mod users_db_operations;
