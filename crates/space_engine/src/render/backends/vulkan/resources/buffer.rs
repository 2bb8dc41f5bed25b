//! Buffers backed by their own device-memory allocation
//!
//! Two upload paths exist and a buffer's memory properties decide which one
//! applies:
//!
//! - **Mapped**: host-visible memory is mapped, written and unmapped.
//! - **Staged**: device-local memory is never mapped. The data goes into a
//!   temporary host-visible staging buffer and a one-shot command buffer copies
//!   it across, with the caller blocked until the queue is idle.

use std::mem;

use ash::{vk, Device};
use bytemuck::Pod;

use super::memory::{write_host, DeviceAllocation, HostMemory, UploadPath, HOST_MEMORY};
use crate::render::backends::vulkan::{CommandPool, DeviceContext, VulkanError, VulkanResult};

struct BufferHandle {
    device: Device,
    buffer: vk::Buffer,
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Buffer wrapper with memory management
///
/// Fields drop in order: the buffer handle, then the memory bound to it.
pub struct Buffer {
    handle: BufferHandle,
    memory: DeviceAllocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = ctx.device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = BufferHandle {
            device: device.clone(),
            buffer: unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? },
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(handle.buffer) };
        let memory = DeviceAllocation::new(device, ctx.memory_properties(), requirements, properties)?;

        unsafe {
            device
                .bind_buffer_memory(handle.buffer, memory.handle(), 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self {
            handle,
            memory,
            size,
            usage,
        })
    }

    /// Host-visible, host-coherent buffer
    pub fn host_visible(ctx: &DeviceContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(ctx, size, usage, HOST_MEMORY)
    }

    /// Host-visible buffer holding `data`
    pub fn host_visible_with_data<T: Pod>(
        ctx: &DeviceContext,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> VulkanResult<Self> {
        let buffer = Self::host_visible(ctx, mem::size_of_val(data) as vk::DeviceSize, usage)?;
        buffer.upload(data)?;
        Ok(buffer)
    }

    /// Device-local buffer filled from `data` through a staging copy
    pub fn device_local_with_data<T: Pod>(
        ctx: &DeviceContext,
        command_pool: &CommandPool,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> VulkanResult<Self> {
        let buffer = Self::new(
            ctx,
            mem::size_of_val(data) as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        buffer.upload_via_staging(ctx, command_pool, data)?;
        Ok(buffer)
    }

    /// Write `data` into a host-visible buffer, tightly packed
    pub fn upload<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Write a single value at offset zero
    pub fn upload_value<T: Pod>(&self, value: &T) -> VulkanResult<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// Write `data` with each element starting `stride` bytes after the previous one
    pub fn upload_strided<T: Pod>(&self, data: &[T], stride: usize) -> VulkanResult<()> {
        let packed = pack_strided(data, stride)?;
        self.write_bytes(&packed)
    }

    /// Copy `data` into this device-local buffer through a staging buffer
    ///
    /// Blocks until the graphics queue is idle.
    pub fn upload_via_staging<T: Pod>(
        &self,
        ctx: &DeviceContext,
        command_pool: &CommandPool,
        data: &[T],
    ) -> VulkanResult<()> {
        stage_bytes(
            &DeviceTransfer::new(ctx, command_pool),
            StagingTarget {
                buffer: self.handle(),
                usage: self.usage,
                properties: self.memory.properties(),
                size: self.size,
            },
            bytemuck::cast_slice(data),
        )
    }

    fn write_bytes(&self, bytes: &[u8]) -> VulkanResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Upload of {} bytes exceeds buffer size {}", bytes.len(), self.size),
            });
        }
        write_host(&self.memory, bytes)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.handle.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

/// Device-side steps of a staged upload
pub trait StagingTransfer {
    /// Keeps the staging memory alive until the copy has completed
    type Staging;

    /// Create a host-visible `TRANSFER_SRC` buffer holding `bytes`
    fn create_staging(&self, bytes: &[u8]) -> VulkanResult<(Self::Staging, vk::Buffer)>;

    /// Copy `size` bytes from `src` to `dst` in a one-shot command buffer and
    /// block until the queue is idle
    fn copy_and_wait(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()>;
}

/// Staging through temporary buffers and the graphics queue
pub struct DeviceTransfer<'a> {
    ctx: &'a DeviceContext,
    command_pool: &'a CommandPool,
}

impl<'a> DeviceTransfer<'a> {
    /// Transfers recorded from `command_pool` and submitted to the graphics queue
    pub fn new(ctx: &'a DeviceContext, command_pool: &'a CommandPool) -> Self {
        Self { ctx, command_pool }
    }
}

impl StagingTransfer for DeviceTransfer<'_> {
    type Staging = Buffer;

    fn create_staging(&self, bytes: &[u8]) -> VulkanResult<(Buffer, vk::Buffer)> {
        let staging = Buffer::host_visible(
            self.ctx,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write_bytes(bytes)?;
        let handle = staging.handle();
        Ok((staging, handle))
    }

    fn copy_and_wait(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.command_pool
            .one_time_submit(self.ctx.graphics_queue(), |device, command_buffer| unsafe {
                device.cmd_copy_buffer(command_buffer, src, dst, &[region]);
            })
    }
}

/// The buffer a staged upload writes into
#[derive(Debug, Clone, Copy)]
pub struct StagingTarget {
    /// Destination handle
    pub buffer: vk::Buffer,
    /// Usage the destination was created with
    pub usage: vk::BufferUsageFlags,
    /// Memory properties of the destination
    pub properties: vk::MemoryPropertyFlags,
    /// Destination size in bytes
    pub size: vk::DeviceSize,
}

/// Validate `target`, then stage `bytes` and copy them across with one submit
///
/// The staging buffer is released only after the copy has completed, also
/// when the copy fails.
pub fn stage_bytes<S: StagingTransfer + ?Sized>(
    transfer: &S,
    target: StagingTarget,
    bytes: &[u8],
) -> VulkanResult<()> {
    check_staging_target(target.usage, target.properties, target.size, bytes.len())?;
    if bytes.is_empty() {
        return Ok(());
    }

    let (staging, src) = transfer.create_staging(bytes)?;
    let copied = transfer.copy_and_wait(src, target.buffer, bytes.len() as vk::DeviceSize);
    drop(staging);
    copied?;

    log::debug!("Staged {} bytes into device-local buffer {:?}", bytes.len(), target.buffer);
    Ok(())
}

/// Lay out `data` so element `i` starts at byte `i * stride`, zero-filling the gaps
pub fn pack_strided<T: Pod>(data: &[T], stride: usize) -> VulkanResult<Vec<u8>> {
    let element_size = mem::size_of::<T>();
    if stride < element_size || stride == 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("Stride {stride} is smaller than the element size {element_size}"),
        });
    }

    let mut packed = vec![0u8; data.len() * stride];
    for (chunk, element) in packed.chunks_exact_mut(stride).zip(data) {
        chunk[..element_size].copy_from_slice(bytemuck::bytes_of(element));
    }
    Ok(packed)
}

/// Preconditions for a staged upload into a device-local buffer
pub fn check_staging_target(
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    size: vk::DeviceSize,
    data_len: usize,
) -> VulkanResult<()> {
    if !usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
        return Err(VulkanError::InvalidOperation {
            reason: "Staged upload target lacks TRANSFER_DST usage".to_string(),
        });
    }
    if UploadPath::for_properties(properties) != UploadPath::Staged {
        return Err(VulkanError::InvalidOperation {
            reason: "Staged upload target is not device-local".to_string(),
        });
    }
    if data_len as vk::DeviceSize > size {
        return Err(VulkanError::InvalidOperation {
            reason: format!("Upload of {data_len} bytes exceeds buffer size {size}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_pack_strided_pads_each_element() {
        let packed = pack_strided(&[1.0f32, 2.0, 3.0], 16).unwrap();
        assert_eq!(packed.len(), 48);
        assert_eq!(&packed[0..4], bytemuck::bytes_of(&1.0f32));
        assert!(packed[4..16].iter().all(|&b| b == 0));
        assert_eq!(&packed[16..20], bytemuck::bytes_of(&2.0f32));
        assert_eq!(&packed[32..36], bytemuck::bytes_of(&3.0f32));
    }

    #[test]
    fn test_pack_strided_with_element_stride_is_tight() {
        let data = [[1u32, 2, 3], [4, 5, 6]];
        let packed = pack_strided(&data, 12).unwrap();
        assert_eq!(packed.as_slice(), bytemuck::cast_slice::<[u32; 3], u8>(&data));
    }

    #[test]
    fn test_pack_strided_rejects_short_stride() {
        assert!(pack_strided(&[1u64], 4).is_err());
    }

    #[test]
    fn test_staging_target_preconditions() {
        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let dst = vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;

        assert!(check_staging_target(dst, local, 64, 64).is_ok());
        assert!(check_staging_target(vk::BufferUsageFlags::VERTEX_BUFFER, local, 64, 64).is_err());
        assert!(check_staging_target(dst, HOST_MEMORY, 64, 64).is_err());
        assert!(check_staging_target(dst, local, 64, 65).is_err());
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Step {
        Staged(Vec<u8>),
        Copied { src: u64, dst: u64, size: vk::DeviceSize },
        Released,
    }

    struct StagingGuard(Rc<RefCell<Vec<Step>>>);

    impl Drop for StagingGuard {
        fn drop(&mut self) {
            self.0.borrow_mut().push(Step::Released);
        }
    }

    #[derive(Default)]
    struct RecordingTransfer {
        steps: Rc<RefCell<Vec<Step>>>,
        fail_copy: bool,
    }

    impl StagingTransfer for RecordingTransfer {
        type Staging = StagingGuard;

        fn create_staging(&self, bytes: &[u8]) -> VulkanResult<(StagingGuard, vk::Buffer)> {
            self.steps.borrow_mut().push(Step::Staged(bytes.to_vec()));
            Ok((StagingGuard(Rc::clone(&self.steps)), vk::Buffer::from_raw(7)))
        }

        fn copy_and_wait(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
            self.steps.borrow_mut().push(Step::Copied {
                src: src.as_raw(),
                dst: dst.as_raw(),
                size,
            });
            if self.fail_copy {
                Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
            } else {
                Ok(())
            }
        }
    }

    fn local_target(usage: vk::BufferUsageFlags) -> StagingTarget {
        StagingTarget {
            buffer: vk::Buffer::from_raw(42),
            usage,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            size: 64,
        }
    }

    #[test]
    fn test_staged_upload_copies_once_then_releases_staging() {
        let transfer = RecordingTransfer::default();
        let data = [1.0f32, 2.0, 3.0];
        let target = local_target(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST);

        stage_bytes(&transfer, target, bytemuck::cast_slice(&data)).unwrap();

        assert_eq!(
            *transfer.steps.borrow(),
            vec![
                Step::Staged(bytemuck::cast_slice(&data).to_vec()),
                Step::Copied { src: 7, dst: 42, size: 12 },
                Step::Released,
            ]
        );
    }

    #[test]
    fn test_staged_upload_rejects_target_without_transfer_dst() {
        let transfer = RecordingTransfer::default();
        let target = local_target(vk::BufferUsageFlags::VERTEX_BUFFER);

        assert!(stage_bytes(&transfer, target, &[0u8; 4]).is_err());
        assert!(transfer.steps.borrow().is_empty());
    }

    #[test]
    fn test_staged_upload_rejects_host_visible_target() {
        let transfer = RecordingTransfer::default();
        let target = StagingTarget {
            properties: HOST_MEMORY,
            ..local_target(vk::BufferUsageFlags::TRANSFER_DST)
        };

        assert!(stage_bytes(&transfer, target, &[0u8; 4]).is_err());
        assert!(transfer.steps.borrow().is_empty());
    }

    #[test]
    fn test_empty_staged_upload_submits_nothing() {
        let transfer = RecordingTransfer::default();
        stage_bytes(&transfer, local_target(vk::BufferUsageFlags::TRANSFER_DST), &[]).unwrap();
        assert!(transfer.steps.borrow().is_empty());
    }

    #[test]
    fn test_failed_copy_still_releases_staging() {
        let transfer = RecordingTransfer {
            fail_copy: true,
            ..RecordingTransfer::default()
        };
        let result = stage_bytes(&transfer, local_target(vk::BufferUsageFlags::TRANSFER_DST), &[9u8; 8]);

        assert!(result.is_err());
        assert_eq!(transfer.steps.borrow().last(), Some(&Step::Released));
        assert_eq!(transfer.steps.borrow().len(), 3);
    }
}
