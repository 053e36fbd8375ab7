pub mod addresses;
pub mod registers;
pub mod settings;
