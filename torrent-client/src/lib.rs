pub mod client;
pub mod file;
pub mod peer;
pub mod tracker;
pub mod util;

pub use util::Sha1;
