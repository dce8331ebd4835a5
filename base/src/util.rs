pub mod cli;
pub mod fs;
pub mod sync;
pub mod test;
