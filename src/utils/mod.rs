pub mod format;
pub mod hash;
pub mod io;
