pub mod file;

pub use file::FileRouteProvider;
