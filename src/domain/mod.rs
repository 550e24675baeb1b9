pub mod fields;
pub mod heading;
pub mod identifier;
pub mod issue;
pub mod ticket;
