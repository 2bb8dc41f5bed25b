//! Device-memory allocations and the memory-type search

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Memory properties for resources the CPU writes directly
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// How data reaches an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    /// Map the memory and copy
    Mapped,
    /// Copy through a staging buffer and a transfer command
    Staged,
}

impl UploadPath {
    /// Device-local memory is always staged, even when it also happens to be host-visible
    pub fn for_properties(properties: vk::MemoryPropertyFlags) -> Self {
        if properties.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
            || !properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            Self::Staged
        } else {
            Self::Mapped
        }
    }
}

/// CPU access to an allocation
pub trait HostMemory {
    /// Properties the memory type was chosen for
    fn properties(&self) -> vk::MemoryPropertyFlags;

    /// Allocated size in bytes, which may exceed the resource size
    fn size(&self) -> vk::DeviceSize;

    /// Map the first `bytes.len()` bytes, copy `bytes` in and unmap
    fn map_and_copy(&self, bytes: &[u8]) -> VulkanResult<()>;
}

/// Copy `bytes` to the start of host-visible `memory`
///
/// Device-local memory and oversized writes are rejected before anything is
/// mapped.
pub fn write_host<M: HostMemory + ?Sized>(memory: &M, bytes: &[u8]) -> VulkanResult<()> {
    if UploadPath::for_properties(memory.properties()) != UploadPath::Mapped {
        return Err(VulkanError::InvalidOperation {
            reason: "Device-local memory must be filled through a staging buffer".to_string(),
        });
    }
    if bytes.len() as vk::DeviceSize > memory.size() {
        return Err(VulkanError::InvalidOperation {
            reason: format!("Write of {} bytes exceeds allocation size {}", bytes.len(), memory.size()),
        });
    }
    if bytes.is_empty() {
        return Ok(());
    }
    memory.map_and_copy(bytes)
}

/// One `VkDeviceMemory` allocation, freed on drop
pub struct DeviceAllocation {
    device: Device,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl DeviceAllocation {
    /// Allocate memory satisfying both the resource's requirements and `properties`
    pub fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let memory_type_index = find_memory_type(memory_properties, requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api)? };

        Ok(Self {
            device: device.clone(),
            memory,
            size: requirements.size,
            properties,
        })
    }

    /// Get the memory handle
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }
}

impl HostMemory for DeviceAllocation {
    fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn map_and_copy(&self, bytes: &[u8]) -> VulkanResult<()> {
        unsafe {
            let ptr = self
                .device
                .map_memory(
                    self.memory,
                    0,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        unsafe {
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Find the first memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (slot, flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        properties
    }

    #[test]
    fn test_find_memory_type_respects_filter_and_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_MEMORY,
            HOST_MEMORY | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&properties, 0b111, HOST_MEMORY).unwrap(), 1);
        assert_eq!(find_memory_type(&properties, 0b100, HOST_MEMORY).unwrap(), 2);
        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_find_memory_type_without_match_is_fatal() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(matches!(
            find_memory_type(&properties, 0b1, HOST_MEMORY),
            Err(VulkanError::NoSuitableMemoryType)
        ));

        // Matching flags exist, but the resource does not accept that type
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, HOST_MEMORY]);
        assert!(find_memory_type(&properties, 0b1, HOST_MEMORY).is_err());
    }

    struct FakeMemory {
        properties: vk::MemoryPropertyFlags,
        contents: RefCell<Vec<u8>>,
        maps: Cell<u32>,
    }

    impl FakeMemory {
        fn new(properties: vk::MemoryPropertyFlags, size: usize) -> Self {
            Self {
                properties,
                contents: RefCell::new(vec![0xAA; size]),
                maps: Cell::new(0),
            }
        }
    }

    impl HostMemory for FakeMemory {
        fn properties(&self) -> vk::MemoryPropertyFlags {
            self.properties
        }

        fn size(&self) -> vk::DeviceSize {
            self.contents.borrow().len() as vk::DeviceSize
        }

        fn map_and_copy(&self, bytes: &[u8]) -> VulkanResult<()> {
            self.maps.set(self.maps.get() + 1);
            self.contents.borrow_mut()[..bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn test_repeated_host_write_leaves_same_bytes() {
        let memory = FakeMemory::new(HOST_MEMORY, 8);
        let bytes = [1u8, 2, 3, 4, 5, 6];

        write_host(&memory, &bytes).unwrap();
        let first = memory.contents.borrow().clone();
        write_host(&memory, &bytes).unwrap();

        assert_eq!(*memory.contents.borrow(), first);
        assert_eq!(&first[..6], &bytes);
        assert_eq!(&first[6..], &[0xAA, 0xAA]);
        assert_eq!(memory.maps.get(), 2);
    }

    #[test]
    fn test_host_write_rejects_device_local_without_mapping() {
        let memory = FakeMemory::new(vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST_MEMORY, 8);
        assert!(write_host(&memory, &[1, 2]).is_err());
        assert_eq!(memory.maps.get(), 0);
    }

    #[test]
    fn test_host_write_rejects_oversized_without_mapping() {
        let memory = FakeMemory::new(HOST_MEMORY, 4);
        assert!(write_host(&memory, &[0; 5]).is_err());
        assert_eq!(memory.maps.get(), 0);
    }

    #[test]
    fn test_empty_host_write_skips_mapping() {
        let memory = FakeMemory::new(HOST_MEMORY, 4);
        write_host(&memory, &[]).unwrap();
        assert_eq!(memory.maps.get(), 0);
    }

    #[test]
    fn test_device_local_memory_is_never_mapped() {
        assert_eq!(
            UploadPath::for_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            UploadPath::Staged
        );
        assert_eq!(
            UploadPath::for_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST_MEMORY),
            UploadPath::Staged
        );
        assert_eq!(UploadPath::for_properties(HOST_MEMORY), UploadPath::Mapped);
    }
}
