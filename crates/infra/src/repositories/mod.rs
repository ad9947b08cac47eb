mod stories;

pub use stories::*;
