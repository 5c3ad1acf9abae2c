//! Memory subsystem for the oxidized-xenon emulator
//!
//! Flat physical RAM, the MMIO device bus that routes physical addresses to
//! peripherals, and the direct-mapped cache controller that sits between the
//! CPU data path and the bus.

pub mod bus;
pub mod cache;
pub mod device;
pub mod devices;
pub mod ram;

pub use bus::Bus;
pub use cache::{CacheController, CacheStats, WritePolicy};
pub use device::Device;
pub use devices::{Console, FrameBuffer};
pub use ram::Ram;
