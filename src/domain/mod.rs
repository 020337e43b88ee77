pub mod models;
pub mod settings;
pub mod state;
pub mod text_store;
