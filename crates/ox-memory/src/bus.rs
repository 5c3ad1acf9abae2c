//! Physical address bus
//!
//! Routes physical addresses either to an attached MMIO device or to backing
//! RAM. Mappings are kept in attach order and the first matching range wins.

use crate::device::Device;
use crate::ram::Ram;
use std::sync::Arc;
use tracing::{info, trace};

struct DeviceMapping {
    device: Arc<dyn Device>,
    start: u64,
    /// Inclusive end of the mapped range
    end: u64,
}

pub struct Bus {
    ram: Ram,
    devices: Vec<DeviceMapping>,
}

impl Bus {
    pub fn new(ram: Ram) -> Self {
        Self {
            ram,
            devices: Vec::new(),
        }
    }

    /// Map a device over `[start, end]`. A device range must be large enough
    /// to satisfy any word access the program issues; word accesses never
    /// straddle a mapping boundary.
    pub fn attach_device(&mut self, device: Arc<dyn Device>, start: u64, end: u64) {
        info!("Bus: mapping device at 0x{:08x}..=0x{:08x}", start, end);
        self.devices.push(DeviceMapping { device, start, end });
    }

    fn mapping(&self, addr: u64) -> Option<&DeviceMapping> {
        self.devices
            .iter()
            .find(|m| addr >= m.start && addr <= m.end)
    }

    pub fn read8(&self, addr: u64) -> u8 {
        if let Some(m) = self.mapping(addr) {
            return m.device.read8(addr - m.start);
        }
        if addr < self.ram.size() {
            return self.ram.read8(addr);
        }
        trace!("Bus: read8 from unmapped 0x{:08x}", addr);
        0
    }

    pub fn write8(&mut self, addr: u64, value: u8) {
        if let Some(m) = self.mapping(addr) {
            m.device.write8(addr - m.start, value);
            return;
        }
        if addr < self.ram.size() {
            self.ram.write8(addr, value);
            return;
        }
        trace!("Bus: write8 to unmapped 0x{:08x} dropped", addr);
    }

    /// Big-endian 32-bit read
    pub fn read_word(&self, addr: u64) -> u32 {
        if let Some(m) = self.mapping(addr) {
            return m.device.read_word(addr - m.start);
        }
        if addr < self.ram.size() {
            return self.ram.read_word(addr);
        }
        trace!("Bus: word read from unmapped 0x{:08x}", addr);
        0
    }

    /// Big-endian 32-bit write
    pub fn write_word(&mut self, addr: u64, value: u32) {
        if let Some(m) = self.mapping(addr) {
            m.device.write_word(addr - m.start, value);
            return;
        }
        if addr < self.ram.size() {
            self.ram.write_word(addr, value);
            return;
        }
        trace!("Bus: word write to unmapped 0x{:08x} dropped", addr);
    }

    pub fn memory_size(&self) -> u64 {
        self.ram.size()
    }

    /// True when a device mapping claims this address. Device ranges may sit
    /// below the RAM size, so cacheability checks need this as well as the
    /// size bound.
    pub fn is_mmio(&self, addr: u64) -> bool {
        self.mapping(addr).is_some()
    }

    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Scratch {
        bytes: Mutex<Vec<u8>>,
    }

    impl Scratch {
        fn new(len: usize) -> Self {
            Self {
                bytes: Mutex::new(vec![0; len]),
            }
        }
    }

    impl Device for Scratch {
        fn contains(&self, offset: u64) -> bool {
            (offset as usize) < self.bytes.lock().len()
        }
        fn read8(&self, offset: u64) -> u8 {
            self.bytes.lock()[offset as usize]
        }
        fn write8(&self, offset: u64, value: u8) {
            self.bytes.lock()[offset as usize] = value;
        }
    }

    #[test]
    fn test_first_match_wins() {
        let mut bus = Bus::new(Ram::new(0x1000).unwrap());
        let a = Arc::new(Scratch::new(16));
        let b = Arc::new(Scratch::new(16));
        bus.attach_device(a.clone(), 0x2000, 0x200F);
        bus.attach_device(b.clone(), 0x2000, 0x200F);
        bus.write8(0x2004, 0x7F);
        assert_eq!(a.read8(4), 0x7F);
        assert_eq!(b.read8(4), 0);
    }

    #[test]
    fn test_fallthrough_to_ram() {
        let mut bus = Bus::new(Ram::new(0x1000).unwrap());
        bus.write_word(0x40, 0x1122_3344);
        assert_eq!(bus.ram().read_word(0x40), 0x1122_3344);
        assert_eq!(bus.read_word(0x40), 0x1122_3344);
    }

    #[test]
    fn test_unmapped_access_is_benign() {
        let mut bus = Bus::new(Ram::new(0x1000).unwrap());
        bus.write_word(0x9000_0000, 0xFFFF_FFFF);
        assert_eq!(bus.read_word(0x9000_0000), 0);
        assert_eq!(bus.read8(0x9000_0000), 0);
    }

    #[test]
    fn test_device_offset_relative() {
        let mut bus = Bus::new(Ram::new(0x1000).unwrap());
        let dev = Arc::new(Scratch::new(16));
        bus.attach_device(dev.clone(), 0x0FFF_0000, 0x0FFF_000F);
        bus.write8(0x0FFF_0003, 0xAA);
        assert_eq!(dev.read8(3), 0xAA);
    }
}
