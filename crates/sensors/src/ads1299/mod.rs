pub mod registers;
pub mod helpers;
pub mod spi;
pub mod acquisition;
pub mod driver;
