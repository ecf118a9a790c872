#[cfg(feature = "std")]
pub mod hosted;
#[cfg(feature = "std")]
pub use hosted::HostPlatform;
