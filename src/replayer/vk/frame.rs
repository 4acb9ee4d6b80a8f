use std::sync::Arc;
use ash::vk;
use color_eyre::Result;

/// Command pool and primary command buffer owned by one frame slot.
pub struct CommandList {
    pub slot: usize,
    pub command_buffer: vk::CommandBuffer,
    command_pool: vk::CommandPool,

    device: Arc<ash::Device>,
}

impl CommandList {
    pub fn new(slot: usize, queue_family: u32, device: Arc<ash::Device>) -> Result<Self> {
        let command_pool = {
            let info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                .queue_family_index(queue_family);
            unsafe { device.create_command_pool(&info, None)? }
        };

        let command_buffer = {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let allocated = unsafe { device.allocate_command_buffers(&info) };
            match allocated {
                Ok(buffers) => buffers[0],
                Err(err) => {
                    unsafe { device.destroy_command_pool(command_pool, None) };
                    return Err(err.into());
                }
            }
        };

        Ok(Self {
            slot,
            command_buffer,
            command_pool,
            device,
        })
    }

    /// Resets the pool and opens the buffer for a one-time submission.
    pub fn begin(&mut self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;
            self.device.begin_command_buffer(
                self.command_buffer,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        Ok(())
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Timestamp query pool holding a begin and end query per dispatch.
pub struct TimestampQueries {
    pub pool: vk::QueryPool,
    pub count: u32,

    device: Arc<ash::Device>,
}

impl TimestampQueries {
    pub fn new(count: u32, device: Arc<ash::Device>) -> Result<Self> {
        let count = count.max(1);
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        let pool = unsafe { device.create_query_pool(&info, None)? };
        Ok(Self { pool, count, device })
    }
}

impl Drop for TimestampQueries {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_query_pool(self.pool, None);
        }
    }
}
