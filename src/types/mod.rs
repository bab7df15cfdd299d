pub mod price;
pub mod symbol;
pub mod volume;

pub use price::Price;
pub use symbol::Symbol;
pub use volume::Volume;
